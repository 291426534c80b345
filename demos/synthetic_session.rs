//! Run an acquisition session against the synthetic sensor
//!
//! ```text
//! cargo run --example synthetic_session -- [config.toml] [seconds]
//! ```
//!
//! Samples are recorded to a file in the system temp directory, a text
//! "display" prints the window every second, blinks are reported as they are
//! detected and the recording is read back at the end.

use biosignal_ring_buffer::detector::max_step;
use biosignal_ring_buffer::{
    init_logging, AcquisitionSession, MappedRecording, MonitorHooks, PipelineConfig, RecordEntry,
    RecordingCursor, SyntheticSensor, SyntheticSignal, WindowFrame,
};
use log::info;
use std::error::Error;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let seconds: u64 = args.next().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(5);

    let path = std::env::temp_dir().join("synthetic_session.bsr");
    let blink_channel = config.channel_index(&config.detector.channel).unwrap_or(0);
    let signal = SyntheticSignal::new(config.channel_count(), config.sample_rate_hz)
        .with_blinks(blink_channel, (config.sample_rate_hz * 1.5) as u64)
        .with_first_pack(1900);
    let sensor = SyntheticSensor::new(signal, 25);

    let detector_channel = config.detector.channel.clone();
    let mut last_print = Instant::now();
    let hooks = MonitorHooks::none()
        .with_display(move |frame: &WindowFrame| {
            if last_print.elapsed() < Duration::from_secs(1) {
                return;
            }
            last_print = Instant::now();
            let step = frame.channel(&detector_channel).and_then(max_step).unwrap_or(0.0);
            println!(
                "window: {} samples over {:.2} s, largest {} step {:.1} uV",
                frame.len(),
                frame.duration_seconds(),
                detector_channel,
                step * 1e6
            );
        })
        .with_trigger(|| -> io::Result<()> {
            println!("blink detected");
            Ok(())
        });

    let recording_path = path.clone();
    let session = AcquisitionSession::start(
        &config,
        sensor,
        move |header| MappedRecording::create(&recording_path, header.clone()),
        hooks,
    )?;

    thread::sleep(Duration::from_secs(seconds));
    let summary = session.stop()?;
    info!("{:?}", summary);

    let mut cursor = RecordingCursor::open(&path)?;
    let mut batches = 0;
    let mut gaps = 0;
    while let Some(entry) = cursor.next()? {
        match entry {
            RecordEntry::Samples(_) => batches += 1,
            RecordEntry::Gap(_) => gaps += 1,
        }
    }

    println!(
        "recorded {} samples in {} batches ({} gaps) to {}",
        cursor.control_block().sample_count,
        batches,
        gaps,
        path.display()
    );
    println!("blinks triggered: {}", summary.triggers_fired);
    Ok(())
}
