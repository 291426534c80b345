//! In-memory side of the acquisition pipeline
//!
//! This module holds the data structures the producer touches on every sample:
//!
//! - `RawSample`, one reading as delivered by the sensor SDK
//! - `SequenceReconstructor`, turning the wrapping hardware pack counter into a
//!   monotonic logical sequence number
//! - `SampleRing`, the fixed-capacity multi-channel circular buffer that backs
//!   the display window
//! - `PersistenceStage`, the append-only staging area drained by the flush daemon
//!
//! None of these types synchronize on their own. They are owned together by the
//! pipeline and mutated under its single critical section.

pub mod ring;
pub mod sequence;
pub mod stage;

use crate::error::SampleError;

/// Largest pack number the hardware counter emits before wrapping to 0
pub const MAX_PACK_NUMBER: u32 = 2047;

/// Modulus of the hardware pack counter
pub const PACK_NUMBER_MODULUS: u64 = MAX_PACK_NUMBER as u64 + 1;

/// One multi-channel reading as delivered by the sensor SDK
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Hardware pack number in `[0, MAX_PACK_NUMBER]`
    pub pack_number: u32,
    /// One value per channel, in native sensor units (volts)
    pub values: Vec<f64>,
}

impl RawSample {
    /// Create a raw sample
    pub fn new(pack_number: u32, values: Vec<f64>) -> Self {
        Self { pack_number, values }
    }

    /// Check that the sample can be accepted by a pipeline with `channel_count` channels
    pub fn validate(&self, channel_count: usize) -> Result<(), SampleError> {
        if self.pack_number > MAX_PACK_NUMBER {
            return Err(SampleError::PackNumberOutOfRange(self.pack_number));
        }
        if self.values.len() != channel_count {
            return Err(SampleError::ChannelMismatch {
                expected: channel_count,
                actual: self.values.len(),
            });
        }
        if let Some(channel) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(SampleError::NonFinite { channel });
        }
        Ok(())
    }
}
