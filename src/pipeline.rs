//! Producer/consumer hub of an acquisition session
//!
//! `SignalPipeline` owns the only mutable state shared between the sensor
//! callback and the consumers: the ring buffer, the sequence reconstructor and
//! the persistence stage. All three sit behind one mutex:
//!
//! - `ingest` takes the lock once per hardware packet and does O(1) work per sample
//! - `read_window` takes it for one O(W) copy of the ring
//! - `take_staged` takes it for an O(1) swap of the stage
//!
//! Logging and statistics happen after the lock is released.

use crate::config::PipelineConfig;
use crate::disk::SampleBatch;
use crate::error::{ConfigError, SampleError};
use crate::memory::ring::SampleRing;
use crate::memory::sequence::SequenceReconstructor;
use crate::memory::stage::PersistenceStage;
use crate::memory::RawSample;
use crate::stats::{PipelineStats, StatsSnapshot};
use log::{debug, warn};
use parking_lot::Mutex;
use std::time::Instant;

/// Values of one channel inside a `WindowFrame`
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTrace {
    /// Channel label
    pub label: String,
    /// Values, oldest first, in sensor units
    pub values: Vec<f64>,
}

/// Chronologically ordered display window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFrame {
    /// Seconds since the oldest sample in the window
    pub relative_timestamps: Vec<f64>,
    /// One trace per channel in configured order
    pub channels: Vec<ChannelTrace>,
}

impl WindowFrame {
    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.relative_timestamps.len()
    }

    /// Whether the window holds no samples
    pub fn is_empty(&self) -> bool {
        self.relative_timestamps.is_empty()
    }

    /// Values of the channel with the given label
    pub fn channel(&self, label: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|trace| trace.label == label)
            .map(|trace| trace.values.as_slice())
    }

    /// Time covered by the window in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.relative_timestamps.last().copied().unwrap_or(0.0)
    }

    /// `(time, value)` pairs of one channel, as plotting libraries expect them
    pub fn points(&self, label: &str) -> Option<Vec<(f64, f64)>> {
        let values = self.channel(label)?;
        Some(
            self.relative_timestamps
                .iter()
                .copied()
                .zip(values.iter().copied())
                .collect(),
        )
    }
}

/// Outcome of one `ingest` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Samples written to the ring and staged
    pub accepted: usize,
    /// Malformed samples skipped
    pub skipped: usize,
    /// Pack number rollovers detected in this batch
    pub rollovers: u64,
    /// Logical sequence number of the last accepted sample
    pub last_sequence: Option<u64>,
}

struct PipelineState {
    ring: SampleRing,
    sequencer: SequenceReconstructor,
    stage: PersistenceStage,
    last_timestamp_ns: Option<u64>,
}

impl PipelineState {
    /// Timestamps never go backwards, even when a synthesized intra-batch
    /// timestamp overtakes the wall clock of the next batch.
    fn next_timestamp(&mut self, candidate_ns: u64) -> u64 {
        let ts = match self.last_timestamp_ns {
            Some(last) if candidate_ns <= last => last + 1,
            _ => candidate_ns,
        };
        self.last_timestamp_ns = Some(ts);
        ts
    }
}

/// Shared buffering and distribution pipeline for one acquisition session
pub struct SignalPipeline {
    channel_labels: Vec<String>,
    sample_interval_ns: u64,
    sink_scale: f64,
    epoch: Instant,
    state: Mutex<PipelineState>,
    stats: PipelineStats,
}

impl SignalPipeline {
    /// Create a pipeline sized from the configuration
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let channel_count = config.channel_count();
        let ring =
            SampleRing::new(channel_count, config.window_capacity()).with_min_fill(config.min_fill);

        Ok(Self {
            channel_labels: config.channel_labels.clone(),
            sample_interval_ns: config.sample_interval_ns(),
            sink_scale: config.sink_scale,
            epoch: Instant::now(),
            state: Mutex::new(PipelineState {
                ring,
                sequencer: SequenceReconstructor::new(),
                stage: PersistenceStage::new(channel_count),
                last_timestamp_ns: None,
            }),
            stats: PipelineStats::default(),
        })
    }

    /// Nanoseconds elapsed since the pipeline was created
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Ingest one hardware packet, timestamped now
    pub fn ingest(&self, batch: &[RawSample]) -> IngestReport {
        self.ingest_at(batch, self.now_ns())
    }

    /// Ingest one hardware packet whose first sample was captured at `batch_timestamp_ns`
    ///
    /// Sample `i` of the packet is stamped `batch_timestamp_ns + i / sample_rate`.
    /// Malformed samples are skipped (their time slot is still consumed) and
    /// never abort the rest of the packet.
    pub fn ingest_at(&self, batch: &[RawSample], batch_timestamp_ns: u64) -> IngestReport {
        let mut report = IngestReport::default();
        let mut rejected: Vec<(usize, SampleError)> = Vec::new();
        let rollover_offset;

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let rollovers_before = state.sequencer.rollover_count();

            for (i, raw) in batch.iter().enumerate() {
                if let Err(e) = raw.validate(self.channel_labels.len()) {
                    rejected.push((i, e));
                    continue;
                }

                let sequence = state.sequencer.next(raw.pack_number);
                let candidate = batch_timestamp_ns + i as u64 * self.sample_interval_ns;
                let timestamp_ns = state.next_timestamp(candidate);

                state.ring.write(&raw.values, timestamp_ns);
                state.stage.push(sequence, timestamp_ns, &raw.values, self.sink_scale);

                report.accepted += 1;
                report.last_sequence = Some(sequence);
            }

            report.rollovers = state.sequencer.rollover_count() - rollovers_before;
            rollover_offset = state.sequencer.rollover_offset();
        }

        report.skipped = rejected.len();
        self.stats.record_ingest(report.accepted, report.skipped, report.rollovers);

        for (i, e) in &rejected {
            warn!("Skipping sample {} of {} in packet: {}", i, batch.len(), e);
        }
        if report.rollovers > 0 {
            debug!("Pack number rollover detected, offset now {}", rollover_offset);
        }

        report
    }

    /// Chronologically ordered copy of the current window
    ///
    /// Returns `None` until the ring holds the configured minimum of samples.
    pub fn read_window(&self) -> Option<WindowFrame> {
        let snapshot = self.state.lock().ring.snapshot()?;

        let channels = self
            .channel_labels
            .iter()
            .cloned()
            .zip(snapshot.channels)
            .map(|(label, values)| ChannelTrace { label, values })
            .collect();

        Some(WindowFrame {
            relative_timestamps: snapshot.relative_seconds,
            channels,
        })
    }

    /// Swap out everything staged since the last call, as a channel-major batch
    ///
    /// Returns `None` if nothing was staged. The transpose happens after the
    /// lock is released.
    pub fn take_staged(&self) -> Option<SampleBatch> {
        let staged = {
            let mut state = self.state.lock();
            if state.stage.is_empty() {
                return None;
            }
            state.stage.take()
        };
        staged.into_batch()
    }

    /// Number of samples waiting for the next flush
    pub fn staged_len(&self) -> usize {
        self.state.lock().stage.len()
    }

    /// Number of samples currently held by the ring
    pub fn buffered_len(&self) -> usize {
        self.state.lock().ring.len()
    }

    /// Channel labels in configured order
    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    /// Current counter values
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &PipelineStats {
        &self.stats
    }
}
