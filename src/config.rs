//! Pipeline configuration
//!
//! All tunables of an acquisition session live in `PipelineConfig`. Every field
//! has a default so a TOML file only needs to name what it changes:
//!
//! ```toml
//! sample_rate_hz = 250.0
//! window_seconds = 10.0
//!
//! [detector]
//! channel = "T3"
//! threshold = 0.000125
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest ring buffer a configuration may ask for, in samples per channel
///
/// 2^24 samples is about 18 hours at 250 Hz.
pub const MAX_WINDOW_SAMPLES: usize = 1 << 24;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration of one acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Channel labels, in the order the sensor reports values
    pub channel_labels: Vec<String>,
    /// Native sample rate of the sensor in Hz
    pub sample_rate_hz: f64,
    /// Duration of the display window in seconds
    pub window_seconds: f64,
    /// Minimum number of buffered samples before a window is served
    pub min_fill: usize,
    /// Factor converting sensor units into recording units (V to uV)
    pub sink_scale: f64,
    /// Interval between persistence flushes in milliseconds
    pub flush_interval_ms: u64,
    /// Interval between display refreshes in milliseconds
    pub display_interval_ms: u64,
    /// Artifact detector settings
    pub detector: DetectorConfig,
    /// Recording header settings
    pub recording: RecordingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_labels: ["O1", "O2", "T3", "T4"].iter().map(|s| s.to_string()).collect(),
            sample_rate_hz: 250.0,
            window_seconds: 10.0,
            min_fill: 100,
            sink_scale: 1e6,
            flush_interval_ms: 1000,
            display_interval_ms: 50,
            detector: DetectorConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

/// Artifact detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Label of the channel the detector watches
    pub channel: String,
    /// Maximum tolerated sample-to-sample change, in sensor units
    pub threshold: f64,
    /// Number of trailing samples inspected per detection
    pub lookback: usize,
    /// Fewer samples than this always yields no detection
    pub min_samples: usize,
    /// Minimum time between two triggers in milliseconds
    pub retrigger_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            channel: "T3".to_string(),
            // ~30 uV
            threshold: 0.000125,
            lookback: 175,
            min_samples: 10,
            retrigger_interval_ms: 500,
        }
    }
}

/// Physical and digital ranges written to the recording header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Lowest representable physical value
    pub physical_min: f64,
    /// Highest representable physical value
    pub physical_max: f64,
    /// Lowest digital value
    pub digital_min: i32,
    /// Highest digital value
    pub digital_max: i32,
    /// Physical unit of the recorded values
    pub unit: String,
    /// Transducer description
    pub transducer: String,
    /// Prefilter description
    pub prefilter: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            physical_min: -4000.0,
            physical_max: 4000.0,
            digital_min: -32768,
            digital_max: 32767,
            unit: "uV".to_string(),
            transducer: String::new(),
            prefilter: String::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from a TOML document and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that the configuration describes a runnable session
    pub fn validate(&self) -> Result<()> {
        if self.channel_labels.is_empty() {
            return Err(ConfigError::invalid("channel_labels", "at least one channel is required"));
        }
        for (i, label) in self.channel_labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(ConfigError::invalid("channel_labels", format!("label {i} is empty")));
            }
            if self.channel_labels[..i].contains(label) {
                return Err(ConfigError::invalid(
                    "channel_labels",
                    format!("duplicate label `{label}`"),
                ));
            }
        }
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(ConfigError::invalid(
                "sample_rate_hz",
                format!("must be positive and finite, got {}", self.sample_rate_hz),
            ));
        }
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                "window_seconds",
                format!("must be positive and finite, got {}", self.window_seconds),
            ));
        }
        let window_samples = self.window_seconds * self.sample_rate_hz;
        if window_samples > MAX_WINDOW_SAMPLES as f64 {
            return Err(ConfigError::invalid(
                "window_seconds",
                format!(
                    "window of {window_samples} samples exceeds the limit of {MAX_WINDOW_SAMPLES}"
                ),
            ));
        }
        if !self.sink_scale.is_finite() || self.sink_scale == 0.0 {
            return Err(ConfigError::invalid("sink_scale", "must be finite and non-zero"));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::invalid("flush_interval_ms", "must be greater than 0"));
        }
        if self.display_interval_ms == 0 {
            return Err(ConfigError::invalid("display_interval_ms", "must be greater than 0"));
        }
        if self.channel_index(&self.detector.channel).is_none() {
            return Err(ConfigError::invalid(
                "detector.channel",
                format!("`{}` is not one of the configured channels", self.detector.channel),
            ));
        }
        if !self.detector.threshold.is_finite() || self.detector.threshold < 0.0 {
            return Err(ConfigError::invalid(
                "detector.threshold",
                "must be finite and non-negative",
            ));
        }
        if self.detector.min_samples < 2 {
            return Err(ConfigError::invalid(
                "detector.min_samples",
                "at least two samples are needed for a difference",
            ));
        }
        if self.detector.lookback < self.detector.min_samples {
            return Err(ConfigError::invalid(
                "detector.lookback",
                "must not be smaller than min_samples",
            ));
        }
        let rec = &self.recording;
        if !(rec.physical_min < rec.physical_max) {
            return Err(ConfigError::invalid(
                "recording.physical_min",
                "must be below physical_max",
            ));
        }
        if rec.digital_min >= rec.digital_max {
            return Err(ConfigError::invalid("recording.digital_min", "must be below digital_max"));
        }
        Ok(())
    }

    /// Number of samples held by the ring buffer (window duration x sample rate)
    pub fn window_capacity(&self) -> usize {
        ((self.window_seconds * self.sample_rate_hz).round() as usize).max(1)
    }

    /// Interval between two consecutive samples in nanoseconds
    pub fn sample_interval_ns(&self) -> u64 {
        (1e9 / self.sample_rate_hz).round() as u64
    }

    /// Number of configured channels
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    /// Index of the channel with the given label
    pub fn channel_index(&self, label: &str) -> Option<usize> {
        self.channel_labels.iter().position(|l| l == label)
    }

    /// Persistence flush cadence
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Display refresh cadence
    pub fn display_interval(&self) -> Duration {
        Duration::from_millis(self.display_interval_ms)
    }

    /// Minimum time between two artifact triggers
    pub fn retrigger_interval(&self) -> Duration {
        Duration::from_millis(self.detector.retrigger_interval_ms)
    }
}
