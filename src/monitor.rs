//! Display and artifact-trigger loop
//!
//! The monitor is the second consumer of the pipeline. On every tick it reads
//! the current window, hands it to the display and runs the artifact detector
//! on it. Detections pass through a `TriggerGate` before they reach the
//! `ActionTrigger`, so a single blink fires the action once.

use crate::config::PipelineConfig;
use crate::detector::{ArtifactDetector, TriggerGate};
use crate::pipeline::{SignalPipeline, WindowFrame};
use crate::stop::StopToken;
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receiver of artifact events
pub trait ActionTrigger: Send {
    /// Fire the action
    fn fire(&mut self) -> io::Result<()>;
}

impl<F> ActionTrigger for F
where
    F: FnMut() -> io::Result<()> + Send,
{
    fn fire(&mut self) -> io::Result<()> {
        self()
    }
}

/// Receiver of display windows
pub trait DisplaySink: Send {
    /// Render one window
    fn render(&mut self, frame: &WindowFrame);
}

impl<F> DisplaySink for F
where
    F: FnMut(&WindowFrame) + Send,
{
    fn render(&mut self, frame: &WindowFrame) {
        self(frame)
    }
}

/// Optional consumers driven by the monitor loop
#[derive(Default)]
pub struct MonitorHooks {
    /// Called with every window
    pub display: Option<Box<dyn DisplaySink>>,
    /// Called on rate-limited artifact detections
    pub trigger: Option<Box<dyn ActionTrigger>>,
}

impl MonitorHooks {
    /// Hooks with neither display nor trigger
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the display callback
    pub fn with_display(mut self, display: impl DisplaySink + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    /// Set the action trigger
    pub fn with_trigger(mut self, trigger: impl ActionTrigger + 'static) -> Self {
        self.trigger = Some(Box::new(trigger));
        self
    }

    /// Whether there is anything for the monitor to drive
    pub fn is_empty(&self) -> bool {
        self.display.is_none() && self.trigger.is_none()
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// A window was available and rendered
    pub rendered: bool,
    /// The detector saw an artifact
    pub detected: bool,
    /// The trigger was fired
    pub fired: bool,
}

/// Display and detection consumer of one pipeline
pub struct Monitor {
    pipeline: Arc<SignalPipeline>,
    detector: ArtifactDetector,
    gate: TriggerGate,
    hooks: MonitorHooks,
    triggers_fired: u64,
}

impl Monitor {
    /// Create a monitor using the detector settings of `config`
    pub fn new(
        pipeline: Arc<SignalPipeline>,
        config: &PipelineConfig,
        hooks: MonitorHooks,
    ) -> Self {
        Self {
            pipeline,
            detector: ArtifactDetector::from_config(&config.detector),
            gate: TriggerGate::new(config.retrigger_interval()),
            hooks,
            triggers_fired: 0,
        }
    }

    /// Number of times the trigger was fired
    pub fn triggers_fired(&self) -> u64 {
        self.triggers_fired
    }

    /// Run one display and detection pass at time `now`
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let Some(frame) = self.pipeline.read_window() else {
            return outcome;
        };

        if let Some(display) = self.hooks.display.as_mut() {
            display.render(&frame);
        }
        outcome.rendered = true;

        outcome.detected = self.detector.detect_configured(&frame);
        if outcome.detected && self.gate.try_fire(now) {
            debug!("Artifact detected on channel {}", self.detector.channel());
            if let Some(trigger) = self.hooks.trigger.as_mut() {
                if let Err(e) = trigger.fire() {
                    warn!("Action trigger failed: {}", e);
                }
            }
            self.triggers_fired += 1;
            outcome.fired = true;
        }
        outcome
    }

    /// Tick every `interval` until `stop` is signalled
    pub fn run(&mut self, interval: Duration, stop: &StopToken) {
        while !stop.is_stopped() {
            self.tick(Instant::now());
            if stop.wait_timeout(interval) {
                break;
            }
        }
    }
}
