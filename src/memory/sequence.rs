//! Logical sequence numbers from the wrapping hardware pack counter
//!
//! The sensor stamps every sample with an 11-bit pack number that wraps from
//! 2047 back to 0. The reconstructor keeps the last observed pack number and a
//! rollover offset; whenever a pack number goes backwards the offset grows by
//! one counter period.
//!
//! # Limitations
//!
//! Only single-wrap regressions are detected. If delivery stalls long enough for
//! the counter to wrap more than once between two observed samples, the
//! reconstructed sequence under-counts by the missed periods. A gap that lands
//! on a pack number larger than the previous one is not seen as a wrap at all.
//! Duplicate pack numbers are tolerated and produce equal logical numbers.

use crate::memory::PACK_NUMBER_MODULUS;

/// Converts hardware pack numbers into monotonically increasing logical numbers
#[derive(Debug, Clone, Default)]
pub struct SequenceReconstructor {
    last_pack_number: u32,
    rollover_offset: u64,
    rollovers: u64,
}

impl SequenceReconstructor {
    /// Create a reconstructor in its session-start state
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the next pack number and return its logical sequence number
    pub fn next(&mut self, pack_number: u32) -> u64 {
        if pack_number < self.last_pack_number {
            self.rollover_offset += PACK_NUMBER_MODULUS;
            self.rollovers += 1;
        }
        self.last_pack_number = pack_number;
        pack_number as u64 + self.rollover_offset
    }

    /// Current rollover offset
    pub fn rollover_offset(&self) -> u64 {
        self.rollover_offset
    }

    /// Number of rollovers detected since session start
    pub fn rollover_count(&self) -> u64 {
        self.rollovers
    }

    /// Last pack number observed
    pub fn last_pack_number(&self) -> u32 {
        self.last_pack_number
    }
}
