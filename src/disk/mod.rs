//! Durable side of the acquisition pipeline
//!
//! This module defines what the flush daemon hands to persistence and the
//! reference sinks that receive it:
//!
//! - `SampleBatch`, a channel-major block of samples in arrival order
//! - `RecordingHeader`, the immutable per-recording description supplied at open
//! - `RecordingSink`, the seam to any recording backend (`write_batch`,
//!   `mark_gap`, `close`)
//! - `MappedRecording`, a memory-mapped recording file with CRC32-checked records
//! - `RecordingCursor`, a reader for recordings written by `MappedRecording`
//! - `MemorySink`, an in-memory sink with failure injection
//!
//! # Recording file layout
//!
//! ```text
//! +--------------+----------------+----------------+-----+
//! | ControlBlock | header record  | batch record   | ... |
//! +--------------+----------------+----------------+-----+
//! ```
//!
//! Every record is a `RecordHeader` followed by its payload. The first record
//! carries the JSON encoded `RecordingHeader`, sample records carry
//! channel-major little-endian `f64` values and gap records carry no payload.

pub mod cursor;
pub mod memory_sink;
pub mod recording;

use crate::config::PipelineConfig;
use crate::error::SinkResult;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Channel-major block of samples handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Logical sequence number of the first sample
    pub first_sequence: u64,
    /// Logical sequence number of the last sample
    pub last_sequence: u64,
    /// Capture timestamp of the first sample, nanoseconds since session start
    pub start_timestamp_ns: u64,
    /// One vector per channel, all of the same length
    pub channels: Vec<Vec<f64>>,
}

impl SampleBatch {
    /// Number of samples per channel
    pub fn sample_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether the batch carries no samples
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}

/// Marks samples that were lost between two recorded batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapMarker {
    /// Logical sequence number of the first lost sample
    pub first_sequence: u64,
    /// Logical sequence number of the last lost sample
    pub last_sequence: u64,
    /// Number of samples lost
    pub sample_count: u64,
}

/// Description of one recorded channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelHeader {
    /// Channel label
    pub label: String,
    /// Physical unit
    pub unit: String,
    /// Sample frequency in Hz
    pub sample_frequency_hz: f64,
    /// Lowest physical value
    pub physical_min: f64,
    /// Highest physical value
    pub physical_max: f64,
    /// Lowest digital value
    pub digital_min: i32,
    /// Highest digital value
    pub digital_max: i32,
    /// Transducer description
    pub transducer: String,
    /// Prefilter description
    pub prefilter: String,
}

/// Immutable description of a recording, supplied once when the sink opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    /// Sample rate shared by all channels
    pub sample_rate_hz: f64,
    /// Recording start, milliseconds since the Unix epoch
    pub start_unix_ms: u64,
    /// Channel descriptions in storage order
    pub channels: Vec<ChannelHeader>,
}

impl RecordingHeader {
    /// Build the header for a session from its configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let rec = &config.recording;
        let channels = config
            .channel_labels
            .iter()
            .map(|label| ChannelHeader {
                label: label.clone(),
                unit: rec.unit.clone(),
                sample_frequency_hz: config.sample_rate_hz,
                physical_min: rec.physical_min,
                physical_max: rec.physical_max,
                digital_min: rec.digital_min,
                digital_max: rec.digital_max,
                transducer: rec.transducer.clone(),
                prefilter: rec.prefilter.clone(),
            })
            .collect();

        Self {
            sample_rate_hz: config.sample_rate_hz,
            start_unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            channels,
        }
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel labels in storage order
    pub fn channel_labels(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.label.as_str()).collect()
    }
}

/// Destination of flushed sample batches
///
/// The flush daemon owns its sink for the whole session, calls `write_batch`
/// once per non-empty flush in production order and `close` exactly once at
/// the end, after the final flush.
pub trait RecordingSink: Send {
    /// Persist one channel-major batch
    fn write_batch(&mut self, batch: &SampleBatch) -> SinkResult<()>;

    /// Record that a batch was lost
    ///
    /// Called after a failed `write_batch`. Sinks without a notion of gaps can
    /// keep the default, which does nothing.
    fn mark_gap(&mut self, gap: &GapMarker) -> SinkResult<()> {
        let _ = gap;
        Ok(())
    }

    /// Finish the recording
    fn close(&mut self) -> SinkResult<()>;
}

impl<S: RecordingSink + ?Sized> RecordingSink for Box<S> {
    fn write_batch(&mut self, batch: &SampleBatch) -> SinkResult<()> {
        (**self).write_batch(batch)
    }

    fn mark_gap(&mut self, gap: &GapMarker) -> SinkResult<()> {
        (**self).mark_gap(gap)
    }

    fn close(&mut self) -> SinkResult<()> {
        (**self).close()
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Recording file control block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    /// Magic number to identify the format (0x42534752 = "BSGR")
    pub magic: u32,
    /// Version of the recording format
    pub version: u32,
    /// Size of the data region in bytes
    pub data_capacity: u64,
    /// Offset of the next record inside the data region
    pub write_pos: u64,
    /// Number of records written, including the header record
    pub record_count: u64,
    /// Number of samples per channel written
    pub sample_count: u64,
    /// Number of gap records written
    pub gap_count: u64,
    /// Set once the recording was closed cleanly
    pub closed: u32,
    /// CRC32 of all preceding fields
    pub crc32: u32,
}

impl ControlBlock {
    /// Encoded size of the control block in bytes
    pub const SIZE: usize = 56;

    /// Magic number for format identification ("BSGR")
    pub const MAGIC: u32 = 0x4253_4752;

    /// Current format version
    pub const VERSION: u32 = 1;

    /// Create the control block of a new recording
    pub fn new(data_capacity: u64) -> Self {
        let mut block = Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            data_capacity,
            write_pos: 0,
            record_count: 0,
            sample_count: 0,
            gap_count: 0,
            closed: 0,
            crc32: 0,
        };
        block.update_crc();
        block
    }

    /// Little-endian encoding
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..16].copy_from_slice(&self.data_capacity.to_le_bytes());
        out[16..24].copy_from_slice(&self.write_pos.to_le_bytes());
        out[24..32].copy_from_slice(&self.record_count.to_le_bytes());
        out[32..40].copy_from_slice(&self.sample_count.to_le_bytes());
        out[40..48].copy_from_slice(&self.gap_count.to_le_bytes());
        out[48..52].copy_from_slice(&self.closed.to_le_bytes());
        out[52..56].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    /// Decode a control block; `None` if `bytes` is too short
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        Some(Self {
            magic: read_u32(bytes, 0),
            version: read_u32(bytes, 4),
            data_capacity: read_u64(bytes, 8),
            write_pos: read_u64(bytes, 16),
            record_count: read_u64(bytes, 24),
            sample_count: read_u64(bytes, 32),
            gap_count: read_u64(bytes, 40),
            closed: read_u32(bytes, 48),
            crc32: read_u32(bytes, 52),
        })
    }

    /// Recalculate the CRC field
    pub fn update_crc(&mut self) {
        self.crc32 = crc32(&self.to_bytes()[..Self::SIZE - 4]);
    }

    /// Verify the magic number and CRC
    pub fn verify(&self) -> bool {
        self.magic == Self::MAGIC
            && self.version == Self::VERSION
            && self.crc32 == crc32(&self.to_bytes()[..Self::SIZE - 4])
    }

    /// Whether the recording was closed cleanly
    pub fn is_closed(&self) -> bool {
        self.closed != 0
    }
}

/// Kind of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordTag {
    /// JSON encoded `RecordingHeader`
    Header = 1,
    /// Channel-major sample values
    Samples = 2,
    /// Lost samples
    Gap = 3,
}

impl RecordTag {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(RecordTag::Header),
            2 => Some(RecordTag::Samples),
            3 => Some(RecordTag::Gap),
            _ => None,
        }
    }
}

/// Header preceding every stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// A marker indicating a valid record (0xAA55)
    pub marker: u16,
    /// Record kind
    pub tag: RecordTag,
    /// Payload size in bytes
    pub size: u32,
    /// CRC32 of the payload
    pub crc32: u32,
    /// Number of channels in the payload
    pub channel_count: u32,
    /// Samples per channel in the payload, or lost samples for a gap
    pub sample_count: u32,
    /// First logical sequence number covered
    pub first_sequence: u64,
    /// Last logical sequence number covered
    pub last_sequence: u64,
    /// Timestamp of the first sample, nanoseconds since session start
    pub timestamp_ns: u64,
}

impl RecordHeader {
    /// Encoded size of the header in bytes
    pub const SIZE: usize = 48;

    /// Marker value for valid records
    pub const MARKER: u16 = 0xAA55;

    /// Create a header for a payload
    ///
    /// The CRC is left empty until `seal` is called with the final field values.
    pub fn new(tag: RecordTag, payload: &[u8]) -> Self {
        Self {
            marker: Self::MARKER,
            tag,
            size: payload.len() as u32,
            crc32: 0,
            channel_count: 0,
            sample_count: 0,
            first_sequence: 0,
            last_sequence: 0,
            timestamp_ns: 0,
        }
    }

    /// Little-endian encoding
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.marker.to_le_bytes());
        out[2..4].copy_from_slice(&(self.tag as u16).to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.crc32.to_le_bytes());
        out[12..16].copy_from_slice(&self.channel_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.sample_count.to_le_bytes());
        // 20..24 reserved
        out[24..32].copy_from_slice(&self.first_sequence.to_le_bytes());
        out[32..40].copy_from_slice(&self.last_sequence.to_le_bytes());
        out[40..48].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out
    }

    /// Decode a header; `None` if `bytes` is too short, unmarked or of unknown kind
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        let marker = u16::from_le_bytes([bytes[0], bytes[1]]);
        if marker != Self::MARKER {
            return None;
        }
        let tag = RecordTag::from_u16(u16::from_le_bytes([bytes[2], bytes[3]]))?;
        Some(Self {
            marker,
            tag,
            size: read_u32(bytes, 4),
            crc32: read_u32(bytes, 8),
            channel_count: read_u32(bytes, 12),
            sample_count: read_u32(bytes, 16),
            first_sequence: read_u64(bytes, 24),
            last_sequence: read_u64(bytes, 32),
            timestamp_ns: read_u64(bytes, 40),
        })
    }

    /// CRC32 over the size, counts, sequences, timestamp and payload
    pub fn compute_crc(&self, payload: &[u8]) -> u32 {
        let bytes = self.to_bytes();
        let mut hasher = Hasher::new();
        hasher.update(&bytes[4..8]);
        hasher.update(&bytes[12..Self::SIZE]);
        hasher.update(payload);
        hasher.finalize()
    }

    /// Store the CRC of the current field values and `payload`
    pub fn seal(&mut self, payload: &[u8]) {
        self.crc32 = self.compute_crc(payload);
    }

    /// Verify the header fields and the payload against the stored CRC
    pub fn verify_crc(&self, payload: &[u8]) -> bool {
        self.crc32 == self.compute_crc(payload)
    }

    /// Total encoded size including the payload
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.size as usize
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Encode channel-major values as little-endian `f64`
pub(crate) fn encode_channels(channels: &[Vec<f64>]) -> Vec<u8> {
    let total: usize = channels.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total * 8);
    for channel in channels {
        for value in channel {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Decode channel-major little-endian `f64` values
///
/// Returns `None` when the payload does not hold exactly
/// `channel_count * sample_count` values.
pub(crate) fn decode_channels(
    payload: &[u8],
    channel_count: usize,
    sample_count: usize,
) -> Option<Vec<Vec<f64>>> {
    let expected = channel_count.checked_mul(sample_count)?.checked_mul(8)?;
    if payload.len() != expected {
        return None;
    }
    let mut values = payload.chunks_exact(8).map(|chunk| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        f64::from_le_bytes(buf)
    });
    Some(
        (0..channel_count)
            .map(|_| values.by_ref().take(sample_count).collect())
            .collect(),
    )
}
