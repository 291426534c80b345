//! Sliding-window artifact detection
//!
//! Eye blinks and electrode pops show up as abrupt steps between consecutive
//! samples. `ArtifactDetector` looks at the trailing samples of one channel and
//! reports whether any single step exceeds a threshold. `TriggerGate`
//! rate-limits the resulting events.

use crate::config::DetectorConfig;
use crate::pipeline::WindowFrame;
use std::time::{Duration, Instant};

/// Threshold detector over first differences
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDetector {
    channel: String,
    threshold: f64,
    lookback: usize,
    min_samples: usize,
}

impl ArtifactDetector {
    /// Create a detector from its configuration section
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            threshold: config.threshold,
            lookback: config.lookback,
            min_samples: config.min_samples,
        }
    }

    /// Label of the watched channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Step threshold in sensor units
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Check the trailing samples of `channel` for a step above the threshold
    ///
    /// Returns `false` when the channel is unknown or holds fewer than the
    /// minimum number of samples.
    pub fn detect(&self, frame: &WindowFrame, channel: &str) -> bool {
        let Some(values) = frame.channel(channel) else {
            return false;
        };
        let tail = &values[values.len().saturating_sub(self.lookback)..];
        if tail.len() < self.min_samples {
            return false;
        }
        max_step(tail).is_some_and(|step| step > self.threshold)
    }

    /// `detect` on the configured channel
    pub fn detect_configured(&self, frame: &WindowFrame) -> bool {
        self.detect(frame, &self.channel)
    }
}

/// Largest absolute difference between two consecutive values
pub fn max_step(values: &[f64]) -> Option<f64> {
    values
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .reduce(f64::max)
}

/// Enforces a minimum interval between two fired events
#[derive(Debug, Clone)]
pub struct TriggerGate {
    min_interval: Duration,
    last_fired: Option<Instant>,
}

impl TriggerGate {
    /// Create a gate that lets at most one event through per `min_interval`
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_fired: None,
        }
    }

    /// Record an event at `now` if the interval since the last one has passed
    pub fn try_fire(&mut self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }
}
