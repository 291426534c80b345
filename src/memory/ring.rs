//! Fixed-capacity multi-channel ring buffer
//!
//! `SampleRing` keeps the most recent `capacity` samples of every channel in
//! parallel arrays, together with a timestamp array of the same length:
//!
//! - Writes are O(1) and never fail; once full the oldest slot is overwritten
//! - The write cursor only ever increases, the physical slot is `cursor % capacity`
//! - Snapshots copy the valid region out in chronological order and rebase the
//!   timestamps so the window starts at relative time zero
//!
//! Slots outside the valid region hold stale data and are never returned.

use std::ops::Range;

/// Minimum number of samples a ring must hold before it serves a snapshot
pub const DEFAULT_MIN_FILL: usize = 100;

/// Chronologically ordered copy of the valid region of a `SampleRing`
#[derive(Debug, Clone, PartialEq)]
pub struct RingSnapshot {
    /// Seconds since the oldest sample in the snapshot
    pub relative_seconds: Vec<f64>,
    /// Values per channel, oldest first
    pub channels: Vec<Vec<f64>>,
}

impl RingSnapshot {
    /// Number of samples per channel
    pub fn len(&self) -> usize {
        self.relative_seconds.len()
    }

    /// Whether the snapshot holds no samples
    pub fn is_empty(&self) -> bool {
        self.relative_seconds.is_empty()
    }
}

/// Circular store of multi-channel samples and their timestamps
#[derive(Debug)]
pub struct SampleRing {
    channels: Vec<Box<[f64]>>,
    timestamps_ns: Box<[u64]>,
    capacity: usize,
    cursor: u64,
    count: usize,
    min_fill: usize,
}

impl SampleRing {
    /// Create a ring holding `capacity` samples of `channel_count` channels
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `channel_count` is zero
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "Ring capacity must be greater than zero");
        assert!(channel_count > 0, "Ring needs at least one channel");

        let channels = (0..channel_count)
            .map(|_| vec![0.0; capacity].into_boxed_slice())
            .collect();

        Self {
            channels,
            timestamps_ns: vec![0; capacity].into_boxed_slice(),
            capacity,
            cursor: 0,
            count: 0,
            min_fill: DEFAULT_MIN_FILL,
        }
    }

    /// Set the minimum fill level required before `snapshot` returns data
    ///
    /// A threshold larger than the capacity is clamped to the capacity, so a
    /// small ring still serves its window once it is full.
    pub fn with_min_fill(mut self, min_fill: usize) -> Self {
        self.min_fill = min_fill;
        self
    }

    /// Write one sample
    ///
    /// `values` holds one value per channel; extra values are ignored and
    /// missing ones leave the previous slot content in place, so callers are
    /// expected to validate the sample first.
    pub fn write(&mut self, values: &[f64], timestamp_ns: u64) {
        debug_assert_eq!(values.len(), self.channels.len());

        let idx = self.slot(self.cursor);
        for (channel, &value) in self.channels.iter_mut().zip(values) {
            channel[idx] = value;
        }
        self.timestamps_ns[idx] = timestamp_ns;

        self.cursor += 1;
        self.count = (self.count + 1).min(self.capacity);
    }

    /// Copy the valid region out in chronological order
    ///
    /// Returns `None` while fewer than the minimum fill of samples has been written.
    pub fn snapshot(&self) -> Option<RingSnapshot> {
        if self.count < self.effective_min_fill() {
            return None;
        }

        let (head, tail) = self.ordered_ranges();

        let origin = self.timestamps_ns[head.start];
        let relative_seconds = self.timestamps_ns[head.clone()]
            .iter()
            .chain(&self.timestamps_ns[tail.clone()])
            .map(|&ts| ts.saturating_sub(origin) as f64 / 1e9)
            .collect();

        let channels = self
            .channels
            .iter()
            .map(|channel| {
                let mut out = Vec::with_capacity(self.count);
                out.extend_from_slice(&channel[head.clone()]);
                out.extend_from_slice(&channel[tail.clone()]);
                out
            })
            .collect();

        Some(RingSnapshot {
            relative_seconds,
            channels,
        })
    }

    /// Physical slot ranges holding valid data, oldest range first
    fn ordered_ranges(&self) -> (Range<usize>, Range<usize>) {
        if self.count < self.capacity {
            // Not wrapped yet: the valid region starts at slot 0
            (0..self.count, 0..0)
        } else {
            let start = self.slot(self.cursor);
            (start..self.capacity, 0..start)
        }
    }

    fn slot(&self, cursor: u64) -> usize {
        (cursor % self.capacity as u64) as usize
    }

    fn effective_min_fill(&self) -> usize {
        self.min_fill.clamp(1, self.capacity)
    }

    /// Number of valid samples currently held
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the ring has wrapped at least once
    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Maximum number of samples held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of channels per sample
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total number of samples written since creation
    pub fn total_written(&self) -> u64 {
        self.cursor
    }
}
