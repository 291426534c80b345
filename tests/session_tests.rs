//! End-to-end tests for acquisition sessions driven by the synthetic sensor

use biosignal_ring_buffer::{
    init_logging, AcquisitionSession, MappedRecording, MemorySink, MonitorHooks, PipelineConfig,
    RecordingCursor, SyntheticSensor, SyntheticSignal, WindowFrame,
};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        sample_rate_hz: 1000.0,
        window_seconds: 1.0,
        min_fill: 50,
        flush_interval_ms: 25,
        display_interval_ms: 10,
        ..Default::default()
    }
}

/// Samples flow from the sensor through the daemon into a recording file
#[test]
fn test_session_records_to_file() {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("synthetic.bsr");
    let config = fast_config();

    // Start near the top of the pack counter so the session sees a rollover
    let signal =
        SyntheticSignal::new(config.channel_count(), config.sample_rate_hz).with_first_pack(2000);
    let sensor = SyntheticSensor::new(signal, 25);

    let recording_path = path.clone();
    let session = AcquisitionSession::start(
        &config,
        sensor,
        move |header| MappedRecording::create(&recording_path, header.clone()),
        MonitorHooks::none(),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    let summary = session.stop().unwrap();

    assert!(summary.stats.samples_ingested >= 100);
    assert!(summary.stats.rollovers >= 1);
    assert_eq!(summary.stats.samples_skipped, 0);
    assert_eq!(summary.flush.samples_written, summary.stats.samples_ingested);
    assert_eq!(summary.flush.batches_dropped, 0);

    let mut cursor = RecordingCursor::open(&path).unwrap();
    assert!(cursor.control_block().is_closed());
    assert_eq!(cursor.control_block().sample_count, summary.stats.samples_ingested);

    let mut expected = 2000u64;
    while let Some(entry) = cursor.next().unwrap() {
        if let biosignal_ring_buffer::RecordEntry::Samples(batch) = entry {
            assert_eq!(batch.first_sequence, expected);
            expected = batch.last_sequence + 1;
        }
    }
    assert_eq!(expected, 2000 + summary.stats.samples_ingested);
}

/// The monitor renders windows and fires the trigger on synthetic blinks
#[test]
fn test_monitor_sees_blinks() {
    init_logging();
    let config = fast_config();
    let t3 = config.channel_index("T3").unwrap();

    let signal =
        SyntheticSignal::new(config.channel_count(), config.sample_rate_hz).with_blinks(t3, 200);
    let sensor = SyntheticSensor::new(signal, 10);

    let frames = Arc::new(AtomicUsize::new(0));
    let last_len = Arc::new(Mutex::new(0usize));
    let triggers = Arc::new(AtomicUsize::new(0));

    let hooks = {
        let frames = frames.clone();
        let last_len = last_len.clone();
        let triggers = triggers.clone();
        MonitorHooks::none()
            .with_display(move |frame: &WindowFrame| {
                frames.fetch_add(1, Ordering::Relaxed);
                *last_len.lock() = frame.len();
            })
            .with_trigger(move || -> io::Result<()> {
                triggers.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
    };

    let sink = MemorySink::default();
    let session = AcquisitionSession::start(&config, sensor, move |_| Ok(sink), hooks).unwrap();
    thread::sleep(Duration::from_millis(700));
    let summary = session.stop().unwrap();

    assert!(frames.load(Ordering::Relaxed) > 0);
    let len = *last_len.lock();
    assert!(len >= 50 && len <= 1000);
    assert!(summary.triggers_fired >= 1);
    assert_eq!(summary.triggers_fired, triggers.load(Ordering::Relaxed) as u64);
}

/// Dropping a session without `stop` still closes its sink once
#[test]
fn test_drop_shuts_down() {
    let config = fast_config();
    let sink = MemorySink::default();
    let handle = sink.clone();
    let signal = SyntheticSignal::new(config.channel_count(), config.sample_rate_hz);
    let sensor = SyntheticSensor::new(signal, 25);

    let session =
        AcquisitionSession::start(&config, sensor, move |_| Ok(sink), MonitorHooks::none())
            .unwrap();
    thread::sleep(Duration::from_millis(60));
    let ingested = session.stats().samples_ingested;
    drop(session);

    assert_eq!(handle.close_calls(), 1);
    assert!(handle.samples()[0].len() as u64 >= ingested);
}

/// The configuration file drives the session
#[test]
fn test_session_from_toml() {
    let config = PipelineConfig::from_toml_str(
        r#"
        channel_labels = ["Fp1", "Fp2"]
        sample_rate_hz = 500.0
        window_seconds = 2.0
        flush_interval_ms = 20

        [detector]
        channel = "Fp1"
        "#,
    )
    .unwrap();

    let sink = MemorySink::default();
    let handle = sink.clone();
    let sensor = SyntheticSensor::new(SyntheticSignal::new(2, 500.0), 10);

    let session =
        AcquisitionSession::start(&config, sensor, move |_| Ok(sink), MonitorHooks::none())
            .unwrap();
    thread::sleep(Duration::from_millis(50));
    let summary = session.stop().unwrap();

    assert_eq!(handle.samples().len(), 2);
    assert_eq!(summary.stats.samples_skipped, 0);
}
