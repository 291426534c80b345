//! Biosignal Ring Buffer - real-time buffering and distribution of
//! multi-channel biosignal samples.
//!
//! # Overview
//!
//! A wearable sensor streams packets of multi-channel samples (EEG, 250 Hz by
//! default) from its SDK thread. This crate accepts those packets and fans them
//! out to independent consumers without the sensor ever waiting on any of them:
//!
//! 1. A fixed-size ring buffer holding the most recent window for display
//! 2. A staging area drained by a background flush daemon into a recording sink
//! 3. A sliding-window artifact detector driving a rate-limited action trigger
//!
//! The hardware numbers its samples with an 11-bit counter; the pipeline turns
//! it into a monotonic logical sequence number so recordings stay ordered
//! across wraparounds.
//!
//! # Key Features
//!
//! - One short critical section per packet on the producer path
//! - Chronological window snapshots with timestamps relative to the oldest sample
//! - Memory-mapped recording files with CRC32 checksums and gap records
//! - Cursor-based reading of finished recordings
//! - Cooperative shutdown with a final flush and exactly one sink close
//!
//! # Usage
//!
//! The library is typically used by:
//! 1. Loading a `PipelineConfig`
//! 2. Starting an `AcquisitionSession` with a sensor device and a sink
//! 3. Reading windows from the session's pipeline, or attaching `MonitorHooks`
//! 4. Stopping the session and reading the recording back with a `RecordingCursor`
//!
//! See `demos/synthetic_session.rs` for a complete run against a synthetic sensor.

#![deny(missing_docs)]

pub mod config;
pub mod detector;
pub mod device;
pub mod disk;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod pipeline;
pub mod session;
pub mod stats;
pub mod stop;
pub mod writer;

pub use config::{DetectorConfig, PipelineConfig, RecordingConfig};
pub use detector::{ArtifactDetector, TriggerGate};
pub use device::{IngestCallback, SensorDevice, SyntheticSensor, SyntheticSignal};
pub use disk::cursor::{RecordEntry, RecordingCursor};
pub use disk::memory_sink::MemorySink;
pub use disk::recording::MappedRecording;
pub use disk::{GapMarker, RecordingHeader, RecordingSink, SampleBatch};
pub use error::{ConfigError, DeviceError, SampleError, SessionError, SinkError};
pub use memory::RawSample;
pub use monitor::{ActionTrigger, DisplaySink, Monitor, MonitorHooks};
pub use pipeline::{IngestReport, SignalPipeline, WindowFrame};
pub use session::{AcquisitionSession, SessionSummary};
pub use stats::StatsSnapshot;
pub use stop::StopToken;
pub use writer::{FlushResult, FlushSummary, PersistenceWriter};

use log::{debug, info};
use once_cell::sync::OnceCell;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Set once the global logger has been installed
static LOGGER: OnceCell<()> = OnceCell::new();

/// Install `env_logger` as the global logger, honouring `RUST_LOG`
///
/// Safe to call more than once; only the first call has an effect. If another
/// logger was installed by the host application it is left in place.
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .try_init();
    });
}

/// Handle to a running flush daemon
pub struct FlushDaemon {
    handle: thread::JoinHandle<error::SinkResult<FlushSummary>>,
}

impl FlushDaemon {
    /// Wait for the daemon to finish its final flush and close the sink
    ///
    /// The daemon only exits after its stop token was signalled.
    pub fn join(self) -> Result<FlushSummary, SessionError> {
        let summary = self
            .handle
            .join()
            .map_err(|_| SessionError::WorkerPanicked("flush-daemon"))??;
        Ok(summary)
    }

    /// Whether the daemon thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Start the flush daemon moving staged samples from `pipeline` into `sink`
///
/// # Arguments
///
/// * `pipeline` - Pipeline whose stage is drained
/// * `sink` - Recording sink, owned by the daemon until it is closed
/// * `interval` - Time between two flushes
/// * `stop` - Token ending the daemon; the daemon flushes one last time and
///   closes the sink before it exits
///
/// # Returns
///
/// A handle to join the daemon, or the error raised while spawning its thread
pub fn start_flush_daemon<S>(
    pipeline: Arc<SignalPipeline>,
    sink: S,
    interval: Duration,
    stop: StopToken,
) -> io::Result<FlushDaemon>
where
    S: RecordingSink + 'static,
{
    let mut writer = PersistenceWriter::new(pipeline, sink);

    let handle = thread::Builder::new()
        .name("biosignal-flush-daemon".to_string())
        .spawn(move || -> error::SinkResult<FlushSummary> {
            debug!("Flush daemon running every {:?}", interval);
            while !stop.wait_timeout(interval) {
                writer.flush_once();
            }

            let summary = writer.finish()?;
            info!(
                "Flush daemon finished: {} batches written, {} dropped",
                summary.batches_written, summary.batches_dropped
            );
            Ok(summary)
        })?;

    Ok(FlushDaemon { handle })
}
