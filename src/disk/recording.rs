//! Memory-mapped recording file
//!
//! `MappedRecording` is the reference `RecordingSink`. It appends records to a
//! memory-mapped file behind a CRC32-protected control block:
//!
//! - The header record is written once, when the recording is created
//! - Every flushed batch becomes one sample record, appended in flush order
//! - Dropped batches become gap records so the loss is visible on read-back
//! - The control block is rewritten and the mapping synced after every record,
//!   so an interrupted session leaves a readable recording behind
//!
//! Unlike a ring, the recording never overwrites: when a record does not fit the
//! file is grown and remapped. A failed resize leaves the file mapped at its
//! previous length, so later records can still be written. `close` trims the
//! file to its written length.

use crate::disk::{
    encode_channels, ControlBlock, GapMarker, RecordHeader, RecordTag, RecordingHeader,
    RecordingSink, SampleBatch,
};
use crate::error::{SinkError, SinkResult};
use log::{debug, info, warn};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Initial size of the data region (1 MiB, about 65 s of 4-channel data)
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024 * 1024;

/// Recording file written through a memory map
pub struct MappedRecording {
    /// Path to the recording file
    path: PathBuf,
    /// Open file handle, kept for resizing
    file: File,
    /// Mapping of the whole file; `None` while remapping or once closed
    mmap: Option<MmapMut>,
    /// Set by `close`
    closed: bool,
    /// In-memory copy of the control block
    control: ControlBlock,
    /// Header the recording was created with
    header: RecordingHeader,
}

impl MappedRecording {
    /// Create a new recording, replacing any file at `path`
    pub fn create<P: AsRef<Path>>(path: P, header: RecordingHeader) -> SinkResult<Self> {
        Self::create_with_capacity(path, header, DEFAULT_INITIAL_CAPACITY)
    }

    /// Create a new recording with a data region of `capacity` bytes
    pub fn create_with_capacity<P: AsRef<Path>>(
        path: P,
        header: RecordingHeader,
        capacity: usize,
    ) -> SinkResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((ControlBlock::SIZE + capacity) as u64)?;

        // Safety: the file was just created by us and is only resized through
        // this handle after the mapping has been dropped.
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let mut recording = Self {
            path,
            file,
            mmap: Some(mmap),
            closed: false,
            control: ControlBlock::new(capacity as u64),
            header,
        };

        let payload = serde_json::to_vec(&recording.header)?;
        let mut record = RecordHeader::new(RecordTag::Header, &payload);
        record.channel_count = recording.header.channel_count() as u32;
        recording.append(record, &payload)?;

        info!(
            "Created recording {:?} ({} channels at {} Hz)",
            recording.path,
            recording.header.channel_count(),
            recording.header.sample_rate_hz
        );
        Ok(recording)
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the recording header
    pub fn header(&self) -> &RecordingHeader {
        &self.header
    }

    /// Get a copy of the control block
    pub fn control_block(&self) -> ControlBlock {
        self.control
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current mapping, mapping the file again if a resize dropped it
    fn mapping(&mut self) -> SinkResult<&mut MmapMut> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.mmap.is_none() {
            // Safety: see `create_with_capacity`
            let mmap = unsafe { MmapOptions::new().map_mut(&self.file)? };
            self.control.data_capacity = mmap.len().saturating_sub(ControlBlock::SIZE) as u64;
            self.mmap = Some(mmap);
        }
        self.mmap.as_mut().ok_or(SinkError::Closed)
    }

    /// Seal one record, append it and persist the control block
    fn append(&mut self, mut record: RecordHeader, payload: &[u8]) -> SinkResult<()> {
        record.seal(payload);
        let total = record.total_size();
        self.ensure_capacity(total)?;

        let pos = ControlBlock::SIZE + self.control.write_pos as usize;
        let mmap = self.mapping()?;
        mmap[pos..pos + RecordHeader::SIZE].copy_from_slice(&record.to_bytes());
        mmap[pos + RecordHeader::SIZE..pos + total].copy_from_slice(payload);

        self.control.write_pos += total as u64;
        self.control.record_count += 1;
        self.write_control()
    }

    /// Grow the file so that `needed` more bytes fit in the data region
    fn ensure_capacity(&mut self, needed: usize) -> SinkResult<()> {
        self.mapping()?;
        let required = self.control.write_pos + needed as u64;
        if required <= self.control.data_capacity {
            return Ok(());
        }

        let new_capacity = required.max(self.control.data_capacity * 2);
        debug!(
            "Growing recording {:?} from {} to {} bytes",
            self.path, self.control.data_capacity, new_capacity
        );

        // The mapping must be released before the file is resized
        if let Some(mmap) = self.mmap.as_ref() {
            mmap.flush()?;
        }
        self.mmap = None;
        let grown = self.file.set_len(ControlBlock::SIZE as u64 + new_capacity);

        // Map whatever length the file has now, grown or not
        self.mapping()?;
        if let Err(e) = grown {
            warn!("Failed to grow recording {:?}: {}", self.path, e);
            return Err(e.into());
        }
        self.write_control()
    }

    /// Write the control block into the mapping and sync it to disk
    fn write_control(&mut self) -> SinkResult<()> {
        // Remapping refreshes `data_capacity`, so map before computing the CRC
        self.mapping()?;
        self.control.update_crc();
        let bytes = self.control.to_bytes();
        let mmap = self.mapping()?;
        mmap[0..ControlBlock::SIZE].copy_from_slice(&bytes);
        mmap.flush()?;
        Ok(())
    }
}

impl RecordingSink for MappedRecording {
    fn write_batch(&mut self, batch: &SampleBatch) -> SinkResult<()> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        let expected = self.header.channel_count();
        if batch.channel_count() != expected {
            return Err(SinkError::ChannelMismatch {
                expected,
                actual: batch.channel_count(),
            });
        }
        let sample_count = batch.sample_count();
        if batch.channels.iter().any(|c| c.len() != sample_count) {
            return Err(SinkError::Rejected("channels have different lengths".to_string()));
        }
        if sample_count == 0 {
            return Ok(());
        }

        let payload = encode_channels(&batch.channels);
        let mut record = RecordHeader::new(RecordTag::Samples, &payload);
        record.channel_count = expected as u32;
        record.sample_count = sample_count as u32;
        record.first_sequence = batch.first_sequence;
        record.last_sequence = batch.last_sequence;
        record.timestamp_ns = batch.start_timestamp_ns;

        self.control.sample_count += sample_count as u64;
        if let Err(e) = self.append(record, &payload) {
            self.control.sample_count -= sample_count as u64;
            return Err(e);
        }
        Ok(())
    }

    fn mark_gap(&mut self, gap: &GapMarker) -> SinkResult<()> {
        let mut record = RecordHeader::new(RecordTag::Gap, &[]);
        record.channel_count = self.header.channel_count() as u32;
        record.sample_count = gap.sample_count as u32;
        record.first_sequence = gap.first_sequence;
        record.last_sequence = gap.last_sequence;

        self.control.gap_count += 1;
        if let Err(e) = self.append(record, &[]) {
            self.control.gap_count -= 1;
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        // Also remaps a recording whose last resize failed
        self.mapping()?;

        self.control.closed = 1;
        let data_capacity = self.control.data_capacity;
        self.control.data_capacity = self.control.write_pos;
        if let Err(e) = self.write_control() {
            self.control.closed = 0;
            self.control.data_capacity = data_capacity;
            return Err(e);
        }

        // Release the mapping, then trim the unused tail of the file
        self.closed = true;
        self.mmap = None;
        self.file
            .set_len(ControlBlock::SIZE as u64 + self.control.write_pos)?;
        self.file.sync_all()?;

        info!(
            "Closed recording {:?}: {} samples, {} gaps",
            self.path, self.control.sample_count, self.control.gap_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::tempdir;

    fn header(channels: usize) -> RecordingHeader {
        let labels = (0..channels).map(|i| format!("C{i}")).collect();
        let config = PipelineConfig {
            channel_labels: labels,
            ..Default::default()
        };
        RecordingHeader::from_config(&config)
    }

    fn batch(first: u64, samples: usize, channels: usize) -> SampleBatch {
        SampleBatch {
            first_sequence: first,
            last_sequence: first + samples as u64 - 1,
            start_timestamp_ns: first * 4_000_000,
            channels: (0..channels)
                .map(|c| (0..samples).map(|s| (c * 1000 + s) as f64).collect())
                .collect(),
        }
    }

    #[test]
    fn test_create_new_recording() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_recording.bsr");

        let recording = MappedRecording::create_with_capacity(&path, header(4), 4096).unwrap();
        let control = recording.control_block();

        assert_eq!(control.magic, ControlBlock::MAGIC);
        assert_eq!(control.version, ControlBlock::VERSION);
        assert_eq!(control.data_capacity, 4096);
        assert_eq!(control.record_count, 1, "header record is written on create");
        assert_eq!(control.sample_count, 0);
        assert!(control.write_pos > RecordHeader::SIZE as u64);
        assert!(control.verify());
        assert!(!control.is_closed());
    }

    #[test]
    fn test_write_batches_updates_control() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_recording.bsr");

        let mut recording = MappedRecording::create(&path, header(2)).unwrap();
        recording.write_batch(&batch(0, 250, 2)).unwrap();
        recording.write_batch(&batch(250, 250, 2)).unwrap();

        let control = recording.control_block();
        assert_eq!(control.record_count, 3);
        assert_eq!(control.sample_count, 500);
        assert!(control.verify());
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.bsr");

        let mut recording = MappedRecording::create_with_capacity(&path, header(4), 1024).unwrap();
        for i in 0..10 {
            recording.write_batch(&batch(i * 100, 100, 4)).unwrap();
        }

        let control = recording.control_block();
        assert_eq!(control.sample_count, 1000);
        assert!(control.data_capacity >= control.write_pos);
        assert!(control.write_pos > 1024);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mismatch.bsr");

        let mut recording = MappedRecording::create(&path, header(4)).unwrap();
        let err = recording.write_batch(&batch(0, 10, 3)).unwrap_err();
        assert!(matches!(err, SinkError::ChannelMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_close_trims_and_rejects_further_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("closed.bsr");

        let mut recording = MappedRecording::create(&path, header(1)).unwrap();
        recording.write_batch(&batch(0, 10, 1)).unwrap();
        recording.mark_gap(&GapMarker {
            first_sequence: 10,
            last_sequence: 19,
            sample_count: 10,
        })
        .unwrap();
        recording.close().unwrap();

        let control = recording.control_block();
        assert!(control.is_closed());
        assert_eq!(control.gap_count, 1);

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, ControlBlock::SIZE as u64 + control.write_pos);

        assert!(matches!(recording.write_batch(&batch(20, 1, 1)), Err(SinkError::Closed)));
        assert!(matches!(recording.close(), Err(SinkError::Closed)));
    }

    #[test]
    fn test_failed_growth_keeps_recording_writable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growth.bsr");

        let mut recording = MappedRecording::create_with_capacity(&path, header(2), 1024).unwrap();
        recording.write_batch(&batch(0, 4, 2)).unwrap();

        // A read-only handle makes both the resize and the remap fail
        recording.file = File::open(&path).unwrap();
        let err = recording.write_batch(&batch(4, 200, 2)).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert!(!recording.is_closed());
        assert_eq!(recording.control_block().sample_count, 4);

        recording.file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        recording
            .mark_gap(&GapMarker {
                first_sequence: 4,
                last_sequence: 203,
                sample_count: 200,
            })
            .unwrap();
        recording.write_batch(&batch(204, 200, 2)).unwrap();
        recording.close().unwrap();

        let control = recording.control_block();
        assert!(control.is_closed());
        assert!(control.verify());
        assert_eq!(control.sample_count, 204);
        assert_eq!(control.gap_count, 1);
        assert_eq!(control.record_count, 4);

        let mut cursor = crate::disk::cursor::RecordingCursor::open(&path).unwrap();
        let samples = cursor.read_all_samples().unwrap();
        assert_eq!(samples[1].len(), 204);
        assert_eq!(samples[1][4], 1000.0);
    }
}
