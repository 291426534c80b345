//! Pipeline counters
//!
//! Counters are updated outside the pipeline's critical section with relaxed
//! atomics. Each one sits on its own cache line because the producer and the
//! flush daemon update different counters from different threads.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    samples_ingested: CachePadded<AtomicU64>,
    samples_skipped: CachePadded<AtomicU64>,
    rollovers: CachePadded<AtomicU64>,
    batches_flushed: CachePadded<AtomicU64>,
    samples_flushed: CachePadded<AtomicU64>,
    failed_flushes: CachePadded<AtomicU64>,
    samples_dropped: CachePadded<AtomicU64>,
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Samples accepted by `ingest`
    pub samples_ingested: u64,
    /// Malformed samples skipped by `ingest`
    pub samples_skipped: u64,
    /// Pack number rollovers detected
    pub rollovers: u64,
    /// Batches handed to the sink successfully
    pub batches_flushed: u64,
    /// Samples handed to the sink successfully
    pub samples_flushed: u64,
    /// Flushes the sink rejected
    pub failed_flushes: u64,
    /// Samples lost to rejected flushes
    pub samples_dropped: u64,
}

impl PipelineStats {
    pub(crate) fn record_ingest(&self, accepted: usize, skipped: usize, rollovers: u64) {
        self.samples_ingested.fetch_add(accepted as u64, Ordering::Relaxed);
        if skipped > 0 {
            self.samples_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        }
        if rollovers > 0 {
            self.rollovers.fetch_add(rollovers, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_flush(&self, samples: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.samples_flushed.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, samples: usize) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        self.samples_dropped.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            rollovers: self.rollovers.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            samples_flushed: self.samples_flushed.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}
