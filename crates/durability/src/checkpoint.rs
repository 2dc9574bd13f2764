//! Checkpoint persistence.
//!
//! A checkpoint is a single durable integer: the index of the next operation
//! to apply. It is persisted only after the matching COW log label is on
//! stable storage, so a loaded index always has its label in the log.
//!
//! # Record Layout
//!
//! ```text
//! ┌────────────┬─────────────┬──────────────────┬──────────┐
//! │ Magic (4)  │ Version (4) │ Next op idx (8)  │ CRC32 (4)│
//! └────────────┴─────────────┴──────────────────┴──────────┘
//! ```
//!
//! [`FileCheckpointStore`] replaces the record with write-fsync-rename:
//!
//! 1. Write to a temporary file (`.checkpoint.tmp`)
//! 2. fsync the temporary file
//! 3. Atomic rename to the final path
//! 4. fsync the parent directory

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Checkpoint file name inside a store directory.
pub const CHECKPOINT_FILE_NAME: &str = "checkpoint";

const CHECKPOINT_TMP_NAME: &str = ".checkpoint.tmp";

/// Magic bytes for checkpoint records: "DCKP"
const CHECKPOINT_MAGIC: [u8; 4] = *b"DCKP";

const CHECKPOINT_VERSION: u32 = 1;

const CHECKPOINT_RECORD_SIZE: usize = 20;

/// Checkpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored record is truncated or fails its checksum
    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    /// Stored record has an unknown version
    #[error("Unsupported checkpoint version: {0}")]
    UnsupportedVersion(u32),
}

/// Durable storage for the next operation index.
pub trait CheckpointStore: Send {
    /// Last persisted index, or `None` if nothing was ever persisted.
    fn load(&self) -> Result<Option<usize>, CheckpointError>;

    /// Durably replace the stored index.
    fn persist(&mut self, next_op_index: usize) -> Result<(), CheckpointError>;
}

/// Encoded checkpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Index of the next operation to apply
    pub next_op_index: u64,
}

impl CheckpointRecord {
    /// Serialize to the fixed-size record.
    pub fn to_bytes(&self) -> [u8; CHECKPOINT_RECORD_SIZE] {
        let mut bytes = [0u8; CHECKPOINT_RECORD_SIZE];
        bytes[0..4].copy_from_slice(&CHECKPOINT_MAGIC);
        bytes[4..8].copy_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.next_op_index.to_le_bytes());
        let crc = crc32fast::hash(&bytes[0..16]);
        bytes[16..20].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Parse and verify a record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        if bytes.len() != CHECKPOINT_RECORD_SIZE {
            return Err(CheckpointError::Corrupt(format!(
                "expected {} bytes, found {}",
                CHECKPOINT_RECORD_SIZE,
                bytes.len()
            )));
        }
        if bytes[0..4] != CHECKPOINT_MAGIC {
            return Err(CheckpointError::Corrupt("bad magic".to_string()));
        }
        let stored_crc = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let computed_crc = crc32fast::hash(&bytes[0..16]);
        if stored_crc != computed_crc {
            return Err(CheckpointError::Corrupt(format!(
                "CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed_crc
            )));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }
        let mut index = [0u8; 8];
        index.copy_from_slice(&bytes[8..16]);
        Ok(CheckpointRecord {
            next_op_index: u64::from_le_bytes(index),
        })
    }
}

/// Checkpoint stored as a single file in a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store under `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileCheckpointStore { dir })
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE_NAME)
    }

    /// Remove the stored checkpoint, if any.
    pub fn clear(&mut self) -> Result<(), CheckpointError> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => sync_dir(&self.dir).map_err(CheckpointError::from),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<usize>, CheckpointError> {
        let bytes = match std::fs::read(self.path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = CheckpointRecord::from_bytes(&bytes)?;
        let index = usize::try_from(record.next_op_index).map_err(|_| {
            CheckpointError::Corrupt(format!("index {} out of range", record.next_op_index))
        })?;
        Ok(Some(index))
    }

    fn persist(&mut self, next_op_index: usize) -> Result<(), CheckpointError> {
        let temp_path = self.dir.join(CHECKPOINT_TMP_NAME);
        let record = CheckpointRecord {
            next_op_index: next_op_index as u64,
        };

        // Step 1: Write to temporary file
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&record.to_bytes())?;

        // Step 2: fsync the file
        file.sync_all()?;
        drop(file);

        // Step 3: Atomic rename
        std::fs::rename(&temp_path, self.path())?;

        // Step 4: fsync parent directory
        sync_dir(&self.dir)?;

        debug!(target: "deltacow::checkpoint", next_op_index, "Persisted checkpoint");
        Ok(())
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// In-memory checkpoint store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<MemoryCheckpoint>>,
}

#[derive(Debug, Default)]
struct MemoryCheckpoint {
    index: Option<usize>,
    persists: u64,
}

impl MemoryCheckpointStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently stored index.
    pub fn current(&self) -> Option<usize> {
        self.inner.lock().index
    }

    /// Number of `persist` calls.
    pub fn persist_count(&self) -> u64 {
        self.inner.lock().persists
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<usize>, CheckpointError> {
        Ok(self.inner.lock().index)
    }

    fn persist(&mut self, next_op_index: usize) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock();
        inner.index = Some(next_op_index);
        inner.persists += 1;
        Ok(())
    }
}
