//! In-memory recording sink
//!
//! `MemorySink` keeps every batch it receives. Clones share the same storage,
//! so a test or a display can keep a handle while the flush daemon owns the
//! sink. Failures can be injected to exercise the drop-and-mark-gap path.

use crate::disk::{GapMarker, RecordingHeader, RecordingSink, SampleBatch};
use crate::error::{SinkError, SinkResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemorySinkState {
    header: Option<RecordingHeader>,
    batches: Vec<SampleBatch>,
    gaps: Vec<GapMarker>,
    close_calls: usize,
    failures_pending: usize,
}

/// Sink that stores batches in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Open an in-memory recording with the given header
    pub fn new(header: RecordingHeader) -> Self {
        let sink = Self::default();
        sink.state.lock().header = Some(header);
        sink
    }

    /// Make the next `count` calls to `write_batch` fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_pending = count;
    }

    /// Header the sink was opened with
    pub fn header(&self) -> Option<RecordingHeader> {
        self.state.lock().header.clone()
    }

    /// All batches written so far, in write order
    pub fn batches(&self) -> Vec<SampleBatch> {
        self.state.lock().batches.clone()
    }

    /// All gaps recorded so far
    pub fn gaps(&self) -> Vec<GapMarker> {
        self.state.lock().gaps.clone()
    }

    /// Concatenation of every written batch, per channel
    pub fn samples(&self) -> Vec<Vec<f64>> {
        let state = self.state.lock();
        let mut out: Vec<Vec<f64>> = Vec::new();
        for batch in &state.batches {
            if out.is_empty() {
                out = vec![Vec::new(); batch.channel_count()];
            }
            for (dst, src) in out.iter_mut().zip(&batch.channels) {
                dst.extend_from_slice(src);
            }
        }
        out
    }

    /// Number of times `close` was called
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Whether the sink was closed
    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }
}

impl RecordingSink for MemorySink {
    fn write_batch(&mut self, batch: &SampleBatch) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.close_calls > 0 {
            return Err(SinkError::Closed);
        }
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(SinkError::Rejected("injected failure".to_string()));
        }
        if let Some(header) = &state.header {
            if header.channel_count() != batch.channel_count() {
                return Err(SinkError::ChannelMismatch {
                    expected: header.channel_count(),
                    actual: batch.channel_count(),
                });
            }
        }
        state.batches.push(batch.clone());
        Ok(())
    }

    fn mark_gap(&mut self, gap: &GapMarker) -> SinkResult<()> {
        self.state.lock().gaps.push(*gap);
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if state.close_calls > 1 {
            return Err(SinkError::Closed);
        }
        Ok(())
    }
}
