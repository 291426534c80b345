//! Batched persistence writer
//!
//! `PersistenceWriter` pairs a pipeline with the sink that owns the recording.
//! Each `flush_once` swaps the pipeline's stage out and hands the batch to the
//! sink. A failed write drops the batch: the samples are counted, a gap is
//! marked and acquisition carries on. `finish` consumes the writer, so the
//! final flush and the single `close` can only happen once.

use crate::disk::{GapMarker, RecordingSink, SampleBatch};
use crate::error::SinkResult;
use crate::pipeline::SignalPipeline;
use log::{debug, warn};
use std::sync::Arc;

/// Outcome of one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Nothing was staged
    Idle,
    /// The sink accepted this many samples
    Written(usize),
    /// The sink rejected the batch and this many samples were dropped
    Dropped(usize),
}

/// Totals of one writer's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Batches the sink accepted
    pub batches_written: u64,
    /// Samples the sink accepted
    pub samples_written: u64,
    /// Batches the sink rejected
    pub batches_dropped: u64,
    /// Samples lost to rejected batches
    pub samples_dropped: u64,
}

impl FlushSummary {
    fn record(&mut self, result: FlushResult) {
        match result {
            FlushResult::Idle => {}
            FlushResult::Written(n) => {
                self.batches_written += 1;
                self.samples_written += n as u64;
            }
            FlushResult::Dropped(n) => {
                self.batches_dropped += 1;
                self.samples_dropped += n as u64;
            }
        }
    }
}

/// Moves staged samples from a pipeline into a recording sink
pub struct PersistenceWriter<S: RecordingSink> {
    pipeline: Arc<SignalPipeline>,
    sink: S,
    summary: FlushSummary,
}

impl<S: RecordingSink> PersistenceWriter<S> {
    /// Create a writer draining `pipeline` into `sink`
    pub fn new(pipeline: Arc<SignalPipeline>, sink: S) -> Self {
        Self {
            pipeline,
            sink,
            summary: FlushSummary::default(),
        }
    }

    /// Flush everything staged since the previous flush
    pub fn flush_once(&mut self) -> FlushResult {
        let result = match self.pipeline.take_staged() {
            None => FlushResult::Idle,
            Some(batch) => self.write(batch),
        };
        self.summary.record(result);
        result
    }

    fn write(&mut self, batch: SampleBatch) -> FlushResult {
        let samples = batch.sample_count();

        match self.sink.write_batch(&batch) {
            Ok(()) => {
                self.pipeline.counters().record_flush(samples);
                debug!(
                    "Flushed {} samples (sequence {}..={})",
                    samples, batch.first_sequence, batch.last_sequence
                );
                FlushResult::Written(samples)
            }
            Err(e) => {
                warn!(
                    "Dropping batch of {} samples (sequence {}..={}): {}",
                    samples, batch.first_sequence, batch.last_sequence, e
                );
                self.pipeline.counters().record_dropped(samples);

                let gap = GapMarker {
                    first_sequence: batch.first_sequence,
                    last_sequence: batch.last_sequence,
                    sample_count: samples as u64,
                };
                if let Err(e) = self.sink.mark_gap(&gap) {
                    warn!("Failed to mark gap in recording: {}", e);
                }
                FlushResult::Dropped(samples)
            }
        }
    }

    /// Totals so far
    pub fn summary(&self) -> FlushSummary {
        self.summary
    }

    /// Flush one last time and close the sink
    ///
    /// The sink is closed even when the final flush fails.
    pub fn finish(mut self) -> SinkResult<FlushSummary> {
        self.flush_once();
        self.sink.close()?;
        Ok(self.summary)
    }
}
