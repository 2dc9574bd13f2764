//! Snapshot sink contract.
//!
//! A [`SnapshotSink`] accepts the COW entries of one partition in order. The
//! engine only ever talks to this trait; [`CowLogWriter`] backs it on disk and
//! [`MemorySink`] keeps records in memory for tests and dry runs.
//!
//! A [`SinkProvider`] opens one sink per partition, either fresh or resumed
//! at a label.

use crate::cow::{CowLogConfig, CowLogError, CowLogWriter, DurabilityMode};
use crate::format::CowRecord;
use deltacow_core::CowEntry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Destination for a partition's COW entries.
pub trait SnapshotSink: Send {
    /// Block size every Replace payload must match.
    fn block_size(&self) -> u32;

    /// Append one entry.
    fn append(&mut self, entry: &CowEntry) -> Result<(), CowLogError>;

    /// Append Replace entries for consecutive blocks starting at `dest_start`.
    fn append_raw_blocks(&mut self, dest_start: u64, data: &[u8]) -> Result<(), CowLogError> {
        let block_size = self.block_size() as usize;
        if data.len() % block_size != 0 {
            return Err(CowLogError::UnalignedPayload {
                len: data.len(),
                block_size: self.block_size(),
            });
        }
        for (i, block) in data.chunks(block_size).enumerate() {
            self.append(&CowEntry::Replace {
                dest_block: dest_start + i as u64,
                data: block.to_vec(),
            })?;
        }
        Ok(())
    }

    /// Append Zero entries for `count` consecutive blocks.
    fn append_zero_blocks(&mut self, dest_start: u64, count: u64) -> Result<(), CowLogError> {
        for dest_block in dest_start..dest_start + count {
            self.append(&CowEntry::Zero { dest_block })?;
        }
        Ok(())
    }

    /// Append a label and make everything before it durable.
    fn add_label(&mut self, label: u64) -> Result<(), CowLogError>;

    /// Make every appended record durable.
    fn sync(&mut self) -> Result<(), CowLogError>;

    /// Mark the log complete. No entries may follow.
    fn finalize(&mut self) -> Result<(), CowLogError>;

    /// Release the sink. Idempotent.
    fn close(&mut self) -> Result<(), CowLogError>;
}

impl SnapshotSink for CowLogWriter {
    fn block_size(&self) -> u32 {
        CowLogWriter::block_size(self)
    }

    fn append(&mut self, entry: &CowEntry) -> Result<(), CowLogError> {
        self.append_entry(entry)
    }

    fn append_raw_blocks(&mut self, dest_start: u64, data: &[u8]) -> Result<(), CowLogError> {
        CowLogWriter::append_raw_blocks(self, dest_start, data)
    }

    fn add_label(&mut self, label: u64) -> Result<(), CowLogError> {
        CowLogWriter::add_label(self, label)
    }

    fn sync(&mut self) -> Result<(), CowLogError> {
        CowLogWriter::sync(self)
    }

    fn finalize(&mut self) -> Result<(), CowLogError> {
        CowLogWriter::finalize(self)
    }

    fn close(&mut self) -> Result<(), CowLogError> {
        CowLogWriter::close(self)
    }
}

/// Opens snapshot sinks by partition name.
pub trait SinkProvider: Send {
    /// Open the sink for `partition`.
    ///
    /// With `resume_label = None` any previous log is discarded. With
    /// `Some(label)` the existing log is kept up to and including the last
    /// occurrence of `label`; a missing label is [`CowLogError::LabelNotFound`].
    fn open_sink(
        &mut self,
        partition: &str,
        block_size: u32,
        resume_label: Option<u64>,
    ) -> Result<Box<dyn SnapshotSink>, CowLogError>;
}

/// File-backed provider: one `<partition>.cow` log per partition in `dir`.
#[derive(Debug, Clone)]
pub struct CowLogDir {
    dir: PathBuf,
    durability: DurabilityMode,
    config: CowLogConfig,
}

impl CowLogDir {
    /// Provider writing logs under `dir` with default durability and config.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CowLogDir {
            dir: dir.into(),
            durability: DurabilityMode::default(),
            config: CowLogConfig::default(),
        }
    }

    /// Set the durability mode (builder pattern).
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set the log configuration (builder pattern).
    pub fn with_config(mut self, config: CowLogConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory holding the logs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a partition's log.
    pub fn log_path(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}.cow", partition))
    }
}

impl SinkProvider for CowLogDir {
    fn open_sink(
        &mut self,
        partition: &str,
        block_size: u32,
        resume_label: Option<u64>,
    ) -> Result<Box<dyn SnapshotSink>, CowLogError> {
        let path = self.log_path(partition);
        let writer = match resume_label {
            None => CowLogWriter::create(&path, block_size, self.durability, self.config.clone())?,
            Some(label) => CowLogWriter::open_append(
                &path,
                block_size,
                label,
                self.durability,
                self.config.clone(),
            )?,
        };
        Ok(Box::new(writer))
    }
}

#[derive(Debug)]
struct MemoryLog {
    block_size: u32,
    records: Vec<CowRecord>,
    /// Records covered by the last sync
    synced_len: usize,
    finalized: bool,
    syncs: u64,
    /// Appends allowed before the sink starts failing
    write_limit: Option<usize>,
}

impl MemoryLog {
    fn new(block_size: u32) -> Self {
        MemoryLog {
            block_size,
            records: Vec::new(),
            synced_len: 0,
            finalized: false,
            syncs: 0,
            write_limit: None,
        }
    }

    fn push(&mut self, record: CowRecord) -> Result<(), CowLogError> {
        if self.finalized {
            return Err(CowLogError::Finalized);
        }
        if let Some(limit) = self.write_limit {
            if limit == 0 {
                return Err(CowLogError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "memory sink write limit reached",
                )));
            }
            self.write_limit = Some(limit - 1);
        }
        self.records.push(record);
        Ok(())
    }

    fn sync(&mut self) {
        self.synced_len = self.records.len();
        self.syncs += 1;
    }
}

/// In-memory sink. Records are shared with a [`MemoryLogHandle`].
pub struct MemorySink {
    log: Arc<Mutex<MemoryLog>>,
    closed: bool,
}

impl MemorySink {
    /// Empty in-memory log.
    pub fn new(block_size: u32) -> Self {
        MemorySink {
            log: Arc::new(Mutex::new(MemoryLog::new(block_size))),
            closed: false,
        }
    }

    /// Handle for inspecting the log after the sink is moved away.
    pub fn handle(&self) -> MemoryLogHandle {
        MemoryLogHandle {
            log: Arc::clone(&self.log),
        }
    }

    fn check_open(&self) -> Result<(), CowLogError> {
        if self.closed {
            Err(CowLogError::Closed)
        } else {
            Ok(())
        }
    }
}

impl SnapshotSink for MemorySink {
    fn block_size(&self) -> u32 {
        self.log.lock().block_size
    }

    fn append(&mut self, entry: &CowEntry) -> Result<(), CowLogError> {
        self.check_open()?;
        let mut log = self.log.lock();
        if let CowEntry::Replace { data, .. } = entry {
            if data.len() != log.block_size as usize {
                return Err(CowLogError::UnalignedPayload {
                    len: data.len(),
                    block_size: log.block_size,
                });
            }
        }
        log.push(CowRecord::Entry(entry.clone()))
    }

    fn add_label(&mut self, label: u64) -> Result<(), CowLogError> {
        self.check_open()?;
        let mut log = self.log.lock();
        log.push(CowRecord::Label(label))?;
        log.sync();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), CowLogError> {
        self.check_open()?;
        self.log.lock().sync();
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CowLogError> {
        self.check_open()?;
        let mut log = self.log.lock();
        let entries = log
            .records
            .iter()
            .filter(|r| matches!(r, CowRecord::Entry(_)))
            .count() as u64;
        log.push(CowRecord::Footer { entries })?;
        log.finalized = true;
        log.sync();
        Ok(())
    }

    fn close(&mut self) -> Result<(), CowLogError> {
        self.closed = true;
        Ok(())
    }
}

/// Shared view of a [`MemorySink`]'s records.
#[derive(Clone)]
pub struct MemoryLogHandle {
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryLogHandle {
    /// All records in append order.
    pub fn records(&self) -> Vec<CowRecord> {
        self.log.lock().records.clone()
    }

    /// Block entries in append order.
    pub fn entries(&self) -> Vec<CowEntry> {
        self.log
            .lock()
            .records
            .iter()
            .filter_map(|r| match r {
                CowRecord::Entry(entry) => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    /// Labels in append order.
    pub fn labels(&self) -> Vec<u64> {
        self.log
            .lock()
            .records
            .iter()
            .filter_map(|r| match r {
                CowRecord::Label(label) => Some(*label),
                _ => None,
            })
            .collect()
    }

    /// Whether a footer was written.
    pub fn is_finalized(&self) -> bool {
        self.log.lock().finalized
    }

    /// Number of syncs (labels and finalize included).
    pub fn sync_count(&self) -> u64 {
        self.log.lock().syncs
    }

    /// Drop every record appended since the last sync, as a power loss would.
    pub fn crash(&self) {
        let mut log = self.log.lock();
        let synced = log.synced_len;
        log.records.truncate(synced);
        log.finalized = matches!(log.records.last(), Some(CowRecord::Footer { .. }));
    }

    /// Fail appends after `limit` more records; `None` removes the limit.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.log.lock().write_limit = limit;
    }
}

/// Provider keeping one [`MemorySink`] log per partition.
#[derive(Clone, Default)]
pub struct MemorySinkProvider {
    logs: Arc<Mutex<HashMap<String, Arc<Mutex<MemoryLog>>>>>,
}

impl MemorySinkProvider {
    /// Provider with no logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on a partition's log, if one was opened.
    pub fn handle(&self, partition: &str) -> Option<MemoryLogHandle> {
        self.logs
            .lock()
            .get(partition)
            .map(|log| MemoryLogHandle {
                log: Arc::clone(log),
            })
    }
}

impl SinkProvider for MemorySinkProvider {
    fn open_sink(
        &mut self,
        partition: &str,
        block_size: u32,
        resume_label: Option<u64>,
    ) -> Result<Box<dyn SnapshotSink>, CowLogError> {
        let mut logs = self.logs.lock();
        let log = match resume_label {
            None => {
                let log = Arc::new(Mutex::new(MemoryLog::new(block_size)));
                logs.insert(partition.to_string(), Arc::clone(&log));
                log
            }
            Some(label) => {
                let log = logs
                    .get(partition)
                    .cloned()
                    .ok_or(CowLogError::LabelNotFound(label))?;
                {
                    let mut inner = log.lock();
                    if inner.block_size != block_size {
                        return Err(CowLogError::BlockSizeMismatch {
                            log: inner.block_size,
                            expected: block_size,
                        });
                    }
                    let keep = inner
                        .records
                        .iter()
                        .rposition(|r| *r == CowRecord::Label(label))
                        .ok_or(CowLogError::LabelNotFound(label))?
                        + 1;
                    inner.records.truncate(keep);
                    inner.synced_len = keep;
                    inner.finalized = false;
                }
                log
            }
        };
        Ok(Box::new(MemorySink { log, closed: false }))
    }
}
