//! COW log writer with durability mode support.
//!
//! The writer appends CRC-framed records to a partition's COW log and fsyncs
//! according to the configured [`DurabilityMode`]. Labels are always synced
//! outside Cache mode, since a checkpoint is only persisted after its label
//! reached stable storage.

use super::{CowLogConfig, CowLogError, CowLogReader, DurabilityMode};
use crate::format::{CowLogHeader, CowRecord, COW_HEADER_SIZE};
use deltacow_core::CowEntry;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Cumulative COW log counters.
///
/// Accumulated over the lifetime of one writer and never reset. In Cache
/// mode records are counted even though nothing reaches disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CowLogCounters {
    /// Records appended (entries, labels and the footer)
    pub appends: u64,
    /// Block entries appended
    pub entries: u64,
    /// Labels appended
    pub labels: u64,
    /// sync/fsync calls
    pub sync_calls: u64,
    /// Bytes written to the log file
    pub bytes_written: u64,
    /// Nanoseconds spent in sync/fsync calls
    pub sync_nanos: u64,
}

/// Append-side handle on one partition's COW log.
pub struct CowLogWriter {
    /// Open log file (None in Cache mode or after close)
    file: Option<BufWriter<File>>,

    path: PathBuf,
    block_size: u32,
    durability: DurabilityMode,
    config: CowLogConfig,

    /// Block entries in the log, including those kept on resume
    entries: u64,

    bytes_since_sync: u64,
    writes_since_sync: usize,
    last_sync_time: Instant,
    has_unsynced_data: bool,

    finalized: bool,
    closed: bool,

    counters: CowLogCounters,
}

impl CowLogWriter {
    /// Create a fresh log, truncating any existing file at `path`.
    ///
    /// In Cache mode no file is created.
    pub fn create(
        path: &Path,
        block_size: u32,
        durability: DurabilityMode,
        config: CowLogConfig,
    ) -> Result<Self, CowLogError> {
        config.validate()?;
        let mut writer = Self::detached(path, block_size, durability, config);
        if !durability.requires_log() {
            return Ok(writer);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut file = BufWriter::with_capacity(writer.config.buffer_size, file);
        file.write_all(&CowLogHeader::new(block_size, now_micros()).to_bytes())?;
        file.flush()?;
        file.get_ref().sync_all()?;

        writer.file = Some(file);
        writer.counters.bytes_written = COW_HEADER_SIZE as u64;
        writer.counters.sync_calls = 1;

        info!(
            target: "deltacow::cow_log",
            path = %path.display(),
            block_size,
            mode = durability.description(),
            "Created COW log"
        );
        Ok(writer)
    }

    /// Reopen an existing log for appending after label `label`.
    ///
    /// Records following the last occurrence of the label are discarded. The
    /// label itself is kept, so the log reads exactly as it did when the
    /// checkpoint was taken.
    pub fn open_append(
        path: &Path,
        block_size: u32,
        label: u64,
        durability: DurabilityMode,
        config: CowLogConfig,
    ) -> Result<Self, CowLogError> {
        config.validate()?;
        if !durability.requires_log() {
            return Ok(Self::detached(path, block_size, durability, config));
        }

        let mut reader = CowLogReader::open(path)?;
        if reader.header().block_size != block_size {
            return Err(CowLogError::BlockSizeMismatch {
                log: reader.header().block_size,
                expected: block_size,
            });
        }

        let mut entries = 0u64;
        let mut resume_at: Option<(u64, u64)> = None;
        while let Some(record) = reader.next_record()? {
            match record {
                CowRecord::Entry(_) => entries += 1,
                CowRecord::Label(l) if l == label => {
                    resume_at = Some((reader.position(), entries));
                }
                _ => {}
            }
        }
        let (offset, entries) = resume_at.ok_or(CowLogError::LabelNotFound(label))?;

        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
        file.sync_all()?;
        let mut file = BufWriter::with_capacity(config.buffer_size, file);
        file.seek(SeekFrom::End(0))?;

        debug!(
            target: "deltacow::cow_log",
            path = %path.display(),
            label,
            offset,
            entries,
            "Reopened COW log at label"
        );

        let mut writer = Self::detached(path, block_size, durability, config);
        writer.file = Some(file);
        writer.entries = entries;
        Ok(writer)
    }

    fn detached(
        path: &Path,
        block_size: u32,
        durability: DurabilityMode,
        config: CowLogConfig,
    ) -> Self {
        CowLogWriter {
            file: None,
            path: path.to_path_buf(),
            block_size,
            durability,
            config,
            entries: 0,
            bytes_since_sync: 0,
            writes_since_sync: 0,
            last_sync_time: Instant::now(),
            has_unsynced_data: false,
            finalized: false,
            closed: false,
            counters: CowLogCounters::default(),
        }
    }

    /// Append one block entry.
    pub fn append_entry(&mut self, entry: &CowEntry) -> Result<(), CowLogError> {
        if let CowEntry::Replace { data, .. } = entry {
            self.check_payload(data.len())?;
        }
        self.check_writable()?;
        self.write_record(&CowRecord::encode_entry(entry))?;
        self.entries += 1;
        self.counters.entries += 1;
        self.maybe_sync()
    }

    /// Append Replace entries for consecutive blocks starting at `dest_start`.
    ///
    /// `data` must be a whole number of blocks.
    pub fn append_raw_blocks(&mut self, dest_start: u64, data: &[u8]) -> Result<(), CowLogError> {
        if data.len() % self.block_size as usize != 0 {
            return Err(CowLogError::UnalignedPayload {
                len: data.len(),
                block_size: self.block_size,
            });
        }
        self.check_writable()?;
        for (i, block) in data.chunks(self.block_size as usize).enumerate() {
            self.write_record(&CowRecord::encode_replace(dest_start + i as u64, block))?;
            self.entries += 1;
            self.counters.entries += 1;
            self.maybe_sync()?;
        }
        Ok(())
    }

    /// Append a label and force it to stable storage.
    pub fn add_label(&mut self, label: u64) -> Result<(), CowLogError> {
        self.check_writable()?;
        self.write_record(&CowRecord::Label(label).to_bytes())?;
        self.counters.labels += 1;
        self.sync()
    }

    /// Append the footer and sync. No records may follow.
    pub fn finalize(&mut self) -> Result<(), CowLogError> {
        self.check_writable()?;
        self.write_record(
            &CowRecord::Footer {
                entries: self.entries,
            }
            .to_bytes(),
        )?;
        self.finalized = true;
        self.sync()?;
        info!(
            target: "deltacow::cow_log",
            path = %self.path.display(),
            entries = self.entries,
            "Finalized COW log"
        );
        Ok(())
    }

    /// Flush buffered records and fsync the log.
    pub fn sync(&mut self) -> Result<(), CowLogError> {
        if self.closed {
            return Err(CowLogError::Closed);
        }
        if let Some(ref mut file) = self.file {
            let start = Instant::now();
            file.flush()?;
            file.get_ref().sync_data()?;
            self.counters.sync_calls += 1;
            self.counters.sync_nanos += start.elapsed().as_nanos() as u64;
        }
        self.reset_sync_counters();
        Ok(())
    }

    /// Sync and release the file. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), CowLogError> {
        if self.closed {
            return Ok(());
        }
        let result = if self.has_unsynced_data {
            self.sync()
        } else {
            Ok(())
        };
        self.file = None;
        self.closed = true;
        result
    }

    /// Block size recorded in the header.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Log file path (not created in Cache mode).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block entries in the log, including entries kept on resume.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Whether the footer has been written.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Snapshot of the cumulative counters.
    pub fn counters(&self) -> CowLogCounters {
        self.counters.clone()
    }

    fn check_payload(&self, len: usize) -> Result<(), CowLogError> {
        if len != self.block_size as usize {
            return Err(CowLogError::UnalignedPayload {
                len,
                block_size: self.block_size,
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), CowLogError> {
        if self.closed {
            return Err(CowLogError::Closed);
        }
        if self.finalized {
            return Err(CowLogError::Finalized);
        }
        Ok(())
    }

    fn write_record(&mut self, bytes: &[u8]) -> Result<(), CowLogError> {
        self.counters.appends += 1;
        let Some(ref mut file) = self.file else {
            return Ok(());
        };
        file.write_all(bytes)?;
        self.counters.bytes_written += bytes.len() as u64;
        self.bytes_since_sync += bytes.len() as u64;
        self.writes_since_sync += 1;
        self.has_unsynced_data = true;
        Ok(())
    }

    /// Handle fsync based on durability mode.
    fn maybe_sync(&mut self) -> Result<(), CowLogError> {
        match self.durability {
            DurabilityMode::Always => self.sync(),
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                if self.has_unsynced_data
                    && (self.writes_since_sync >= batch_size
                        || self.bytes_since_sync >= self.config.sync_bytes
                        || self.last_sync_time.elapsed().as_millis() as u64 >= interval_ms)
                {
                    self.sync()
                } else {
                    Ok(())
                }
            }
            DurabilityMode::Cache => Ok(()),
        }
    }

    fn reset_sync_counters(&mut self) {
        self.bytes_since_sync = 0;
        self.writes_since_sync = 0;
        self.last_sync_time = Instant::now();
        self.has_unsynced_data = false;
    }
}

impl Drop for CowLogWriter {
    fn drop(&mut self) {
        if self.has_unsynced_data {
            if let Some(ref mut file) = self.file {
                let result = file.flush().and_then(|()| file.get_ref().sync_data());
                if let Err(e) = result {
                    warn!(
                        target: "deltacow::cow_log",
                        path = %self.path.display(),
                        error = %e,
                        "Failed to sync COW log on drop"
                    );
                }
            }
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
