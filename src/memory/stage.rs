//! Staging area for samples awaiting persistence
//!
//! Samples are appended row by row (one sample of every channel at a time) in
//! the exact order the pipeline accepted them. The flush daemon swaps the whole
//! stage out in O(1) and transposes it into a channel-major `SampleBatch`
//! outside of the critical section.

use crate::disk::SampleBatch;

/// Append-only, sample-major staging buffer
#[derive(Debug, Clone)]
pub struct PersistenceStage {
    channel_count: usize,
    sequences: Vec<u64>,
    timestamps_ns: Vec<u64>,
    values: Vec<f64>,
}

impl PersistenceStage {
    /// Create an empty stage for `channel_count` channels
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count,
            sequences: Vec::new(),
            timestamps_ns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append one sample, multiplying every value by `scale`
    pub fn push(&mut self, sequence: u64, timestamp_ns: u64, values: &[f64], scale: f64) {
        debug_assert_eq!(values.len(), self.channel_count);

        self.sequences.push(sequence);
        self.timestamps_ns.push(timestamp_ns);
        self.values.extend(values.iter().map(|v| v * scale));
    }

    /// Swap the staged samples out, leaving an empty stage behind
    ///
    /// The replacement reserves room for as many samples as were taken, since
    /// the producer refills at a steady rate between flushes.
    pub fn take(&mut self) -> PersistenceStage {
        let reserve = self.sequences.len();
        let mut fresh = PersistenceStage::new(self.channel_count);
        fresh.sequences.reserve(reserve);
        fresh.timestamps_ns.reserve(reserve);
        fresh.values.reserve(reserve * self.channel_count);
        std::mem::replace(self, fresh)
    }

    /// Number of staged samples
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Transpose the staged samples into a channel-major batch
    ///
    /// Returns `None` for an empty stage.
    pub fn into_batch(self) -> Option<SampleBatch> {
        let first_sequence = *self.sequences.first()?;
        let last_sequence = *self.sequences.last()?;
        let start_timestamp_ns = *self.timestamps_ns.first()?;
        let sample_count = self.sequences.len();

        let mut channels: Vec<Vec<f64>> = (0..self.channel_count)
            .map(|_| Vec::with_capacity(sample_count))
            .collect();
        for row in self.values.chunks_exact(self.channel_count) {
            for (channel, &value) in channels.iter_mut().zip(row) {
                channel.push(value);
            }
        }

        Some(SampleBatch {
            first_sequence,
            last_sequence,
            start_timestamp_ns,
            channels,
        })
    }
}
