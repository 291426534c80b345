//! Acquisition session lifecycle
//!
//! An `AcquisitionSession` wires one sensor device, one pipeline, one flush
//! daemon and an optional monitor loop together. Everything that can fail is
//! done before the device starts streaming, so a session either runs or never
//! touches the sensor. Shutdown always runs in the same order:
//!
//! 1. stop the device, so no callback runs afterwards
//! 2. signal the stop token
//! 3. join the monitor loop
//! 4. join the flush daemon, which flushes once more and closes the sink

use crate::config::PipelineConfig;
use crate::device::SensorDevice;
use crate::disk::{RecordingHeader, RecordingSink};
use crate::error::{SessionError, SinkResult};
use crate::memory::RawSample;
use crate::monitor::{Monitor, MonitorHooks};
use crate::pipeline::SignalPipeline;
use crate::stats::StatsSnapshot;
use crate::stop::StopToken;
use crate::writer::FlushSummary;
use crate::{start_flush_daemon, FlushDaemon};
use log::{error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Totals reported when a session stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    /// Time between start and stop
    pub duration: Duration,
    /// Pipeline counters at shutdown
    pub stats: StatsSnapshot,
    /// Flush daemon totals
    pub flush: FlushSummary,
    /// Rate-limited artifact triggers fired by the monitor
    pub triggers_fired: u64,
}

/// A running acquisition
pub struct AcquisitionSession<D: SensorDevice> {
    device: D,
    pipeline: Arc<SignalPipeline>,
    stop: StopToken,
    daemon: Option<FlushDaemon>,
    monitor: Option<JoinHandle<u64>>,
    started_at: Instant,
}

impl<D: SensorDevice> AcquisitionSession<D> {
    /// Set up the pipeline and its consumers, then start the device
    ///
    /// `open_sink` receives the recording header built from `config` and is
    /// called exactly once. A failure there, an invalid configuration or a
    /// device that refuses to start aborts the session before any sample is
    /// accepted.
    pub fn start<S, F>(
        config: &PipelineConfig,
        mut device: D,
        open_sink: F,
        hooks: MonitorHooks,
    ) -> Result<Self>
    where
        S: RecordingSink + 'static,
        F: FnOnce(&RecordingHeader) -> SinkResult<S>,
    {
        config.validate()?;
        let header = RecordingHeader::from_config(config);
        let sink = open_sink(&header)?;
        let pipeline = Arc::new(SignalPipeline::new(config)?);
        let stop = StopToken::new();

        let daemon =
            start_flush_daemon(pipeline.clone(), sink, config.flush_interval(), stop.clone())
                .map_err(SessionError::Spawn)?;

        let monitor = if hooks.is_empty() {
            None
        } else {
            let mut monitor = Monitor::new(pipeline.clone(), config, hooks);
            let interval = config.display_interval();
            let monitor_stop = stop.clone();
            let spawned = thread::Builder::new()
                .name("biosignal-monitor".to_string())
                .spawn(move || {
                    monitor.run(interval, &monitor_stop);
                    monitor.triggers_fired()
                });
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    stop.stop();
                    let _ = daemon.join();
                    return Err(SessionError::Spawn(e));
                }
            }
        };

        let producer = pipeline.clone();
        device.set_callback(Some(Box::new(move |batch: &[RawSample]| {
            producer.ingest(batch);
        })));

        let mut session = Self {
            device,
            pipeline,
            stop,
            daemon: Some(daemon),
            monitor,
            started_at: Instant::now(),
        };

        if let Err(e) = session.device.start_signal() {
            error!("Sensor refused to start: {}", e);
            let _ = session.shutdown();
            return Err(e.into());
        }

        info!(
            "Acquisition started: {} channels at {} Hz",
            config.channel_count(),
            config.sample_rate_hz
        );
        Ok(session)
    }

    /// Shared pipeline, for display or inspection
    pub fn pipeline(&self) -> &Arc<SignalPipeline> {
        &self.pipeline
    }

    /// Token the session's workers wait on
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Device driving this session
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Current pipeline counters
    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats()
    }

    /// Stop acquisition, flush what is left and close the sink
    pub fn stop(mut self) -> Result<SessionSummary> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<SessionSummary> {
        if let Err(e) = self.device.stop_signal() {
            error!("Sensor did not stop cleanly: {}", e);
        }
        self.device.set_callback(None);
        self.stop.stop();

        let triggers_fired = match self.monitor.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SessionError::WorkerPanicked("monitor"))?,
            None => 0,
        };

        let flush = match self.daemon.take() {
            Some(daemon) => daemon.join()?,
            None => FlushSummary::default(),
        };

        let summary = SessionSummary {
            duration: self.started_at.elapsed(),
            stats: self.pipeline.stats(),
            flush,
            triggers_fired,
        };
        info!(
            "Acquisition stopped after {:?}: {} samples ingested, {} flushed, {} dropped",
            summary.duration,
            summary.stats.samples_ingested,
            summary.stats.samples_flushed,
            summary.stats.samples_dropped
        );
        Ok(summary)
    }
}

impl<D: SensorDevice> Drop for AcquisitionSession<D> {
    fn drop(&mut self) {
        if self.daemon.is_some() {
            let _ = self.shutdown();
        }
    }
}
