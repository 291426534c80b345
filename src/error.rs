//! Error types for the acquisition pipeline
//!
//! Errors are split by where they can surface:
//!
//! - `ConfigError` is raised while loading or validating a `PipelineConfig`
//! - `SampleError` describes why a single raw sample was rejected by `ingest`;
//!   it never leaves the producer path, it is only counted and logged
//! - `SinkError` covers the recording sink and the recording file format
//! - `DeviceError` is reported by a `SensorDevice` that cannot start or stop
//! - `SessionError` is the only error that aborts a session, and only before
//!   acquisition starts (or when a worker thread panicked at shutdown)

use std::io;
use thiserror::Error;

/// Errors produced while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the pipeline cannot run with
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Human readable explanation
        reason: String,
    },
    /// The TOML document could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration file could not be read
    #[error("failed to read configuration file: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Reasons a single raw sample is skipped by the ingest path
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    /// The sample carries a different number of channel values than configured
    #[error("expected {expected} channel values, got {actual}")]
    ChannelMismatch {
        /// Configured channel count
        expected: usize,
        /// Channel count found in the sample
        actual: usize,
    },
    /// A channel value is NaN or infinite
    #[error("channel {channel} holds a non-finite value")]
    NonFinite {
        /// Index of the offending channel
        channel: usize,
    },
    /// The hardware pack number is outside the counter range
    #[error("pack number {0} is outside the hardware counter range")]
    PackNumberOutOfRange(u32),
}

/// Errors reported by a recording sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// An I/O error occurred
    #[error("recording I/O error: {0}")]
    Io(#[from] io::Error),
    /// The recording file is not a recording or its control block is corrupted
    #[error("recording file is invalid or corrupted")]
    InvalidRecording,
    /// A record failed its integrity check
    #[error("record at offset {offset} is corrupted")]
    CorruptedRecord {
        /// Offset of the record inside the data region
        offset: u64,
    },
    /// The recording header could not be encoded or decoded
    #[error("recording header encoding failed: {0}")]
    Header(#[from] serde_json::Error),
    /// The batch shape does not match the recording header
    #[error("batch has {actual} channels, recording expects {expected}")]
    ChannelMismatch {
        /// Channel count declared in the header
        expected: usize,
        /// Channel count found in the batch
        actual: usize,
    },
    /// The sink was already closed
    #[error("recording sink is closed")]
    Closed,
    /// Failure reported by an external sink implementation
    #[error("sink rejected the batch: {0}")]
    Rejected(String),
}

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Errors reported by a sensor device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device is already streaming
    #[error("device is already streaming")]
    AlreadyStarted,
    /// No ingest callback was registered before `start_signal`
    #[error("no ingest callback registered")]
    NoCallback,
    /// The device refused a command
    #[error("device refused command: {0}")]
    Refused(String),
    /// The acquisition thread could not be spawned
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors that abort an acquisition session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The recording sink failed during setup or close
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// The sensor device could not be started or stopped
    #[error("sensor device error: {0}")]
    Device(#[from] DeviceError),
    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(io::Error),
    /// A worker thread panicked
    #[error("worker thread `{0}` panicked")]
    WorkerPanicked(&'static str),
}
