//! Cursor for reading recordings back
//!
//! `RecordingCursor` maps a recording file read-only and walks its records in
//! write order. The cursor keeps its position, so a recording can be consumed
//! in batches:
//!
//! - `next` returns one sample batch or gap at a time
//! - `read_batch` collects up to `n` entries
//! - `read_all_samples` concatenates every sample record per channel
//!
//! Every record is checked against its CRC before it is returned. Recordings
//! that were never closed are readable up to the last record whose control
//! block update reached the disk.

use crate::disk::{
    decode_channels, ControlBlock, GapMarker, RecordHeader, RecordTag, RecordingHeader,
    SampleBatch,
};
use crate::error::{SinkError, SinkResult};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::Path;

/// One entry of a recording, in write order
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEntry {
    /// A flushed batch of samples
    Samples(SampleBatch),
    /// Samples lost by a failed flush
    Gap(GapMarker),
}

/// Sequential reader over a recording file
pub struct RecordingCursor {
    /// Read-only mapping of the whole file
    mmap: Mmap,
    /// Control block read at open
    control: ControlBlock,
    /// Header decoded from the first record
    header: RecordingHeader,
    /// Offset of the next record inside the data region
    position: u64,
    /// Offset of the first record after the header
    first_entry: u64,
}

impl RecordingCursor {
    /// Open a recording and position the cursor on its first batch
    pub fn open<P: AsRef<Path>>(path: P) -> SinkResult<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() < ControlBlock::SIZE as u64 {
            return Err(SinkError::InvalidRecording);
        }
        // Safety: the mapping is read-only and the recording is not written
        // through any other handle while the cursor is alive.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let control = ControlBlock::from_bytes(&mmap).ok_or(SinkError::InvalidRecording)?;
        if !control.verify() {
            return Err(SinkError::InvalidRecording);
        }
        if ControlBlock::SIZE as u64 + control.write_pos > mmap.len() as u64 {
            return Err(SinkError::InvalidRecording);
        }

        let (record, payload) =
            Self::record_at(&mmap, &control, 0)?.ok_or(SinkError::InvalidRecording)?;
        if record.tag != RecordTag::Header {
            return Err(SinkError::InvalidRecording);
        }
        let header: RecordingHeader = serde_json::from_slice(payload)?;
        let first_entry = record.total_size() as u64;

        Ok(Self {
            mmap,
            control,
            header,
            position: first_entry,
            first_entry,
        })
    }

    /// Decode the record at `offset`, verifying its CRC
    fn record_at<'a>(
        mmap: &'a [u8],
        control: &ControlBlock,
        offset: u64,
    ) -> SinkResult<Option<(RecordHeader, &'a [u8])>> {
        if offset >= control.write_pos {
            return Ok(None);
        }
        let start = ControlBlock::SIZE + offset as usize;
        let end_of_data = ControlBlock::SIZE + control.write_pos as usize;

        let record = RecordHeader::from_bytes(&mmap[start..end_of_data])
            .ok_or(SinkError::CorruptedRecord { offset })?;
        let payload_start = start + RecordHeader::SIZE;
        let payload_end = payload_start + record.size as usize;
        if payload_end > end_of_data {
            return Err(SinkError::CorruptedRecord { offset });
        }

        let payload = &mmap[payload_start..payload_end];
        if !record.verify_crc(payload) {
            return Err(SinkError::CorruptedRecord { offset });
        }
        Ok(Some((record, payload)))
    }

    /// Header of the recording
    pub fn header(&self) -> &RecordingHeader {
        &self.header
    }

    /// Control block as read at open
    pub fn control_block(&self) -> ControlBlock {
        self.control
    }

    /// Current offset inside the data region
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether every record has been read
    pub fn at_end(&self) -> bool {
        self.position >= self.control.write_pos
    }

    /// Move back to the first batch
    pub fn rewind(&mut self) {
        self.position = self.first_entry;
    }

    /// Read the next entry
    pub fn next(&mut self) -> SinkResult<Option<RecordEntry>> {
        let Some((record, payload)) = Self::record_at(&self.mmap, &self.control, self.position)?
        else {
            return Ok(None);
        };
        let offset = self.position;
        self.position += record.total_size() as u64;

        let entry = match record.tag {
            RecordTag::Samples => {
                let channels = decode_channels(
                    payload,
                    record.channel_count as usize,
                    record.sample_count as usize,
                )
                .ok_or(SinkError::CorruptedRecord { offset })?;
                RecordEntry::Samples(SampleBatch {
                    first_sequence: record.first_sequence,
                    last_sequence: record.last_sequence,
                    start_timestamp_ns: record.timestamp_ns,
                    channels,
                })
            }
            RecordTag::Gap => RecordEntry::Gap(GapMarker {
                first_sequence: record.first_sequence,
                last_sequence: record.last_sequence,
                sample_count: record.sample_count as u64,
            }),
            // Only the first record may be a header
            RecordTag::Header => return Err(SinkError::CorruptedRecord { offset }),
        };
        Ok(Some(entry))
    }

    /// Read up to `max_count` entries
    pub fn read_batch(&mut self, max_count: usize) -> SinkResult<Vec<RecordEntry>> {
        let mut entries = Vec::with_capacity(max_count);

        for _ in 0..max_count {
            match self.next()? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        Ok(entries)
    }

    /// Concatenate all remaining sample records per channel, skipping gaps
    pub fn read_all_samples(&mut self) -> SinkResult<Vec<Vec<f64>>> {
        let mut channels = vec![Vec::new(); self.header.channel_count()];
        while let Some(entry) = self.next()? {
            if let RecordEntry::Samples(batch) = entry {
                for (dst, src) in channels.iter_mut().zip(batch.channels) {
                    dst.extend(src);
                }
            }
        }
        Ok(channels)
    }
}
