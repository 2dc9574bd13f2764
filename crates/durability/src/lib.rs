//! Durability layer for deltacow
//!
//! This crate handles everything that touches stable storage on the write side
//! of a partition update:
//!
//! - COW log: append-only, CRC-framed log of block entries and labels
//! - Durability modes: Cache, Always, Standard (default)
//! - Snapshot sink contract (`SnapshotSink`, `SinkProvider`) with file-backed
//!   and in-memory implementations
//! - Checkpoint store: crash-safe persistence of the next operation index
//! - Replay harness for verifying log contents in tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint; // Next-operation index persistence
pub mod cow; // COW log writer/reader, durability modes, config
pub mod format; // On-disk record and header formats
pub mod sink; // Snapshot sink contract and providers
pub mod testing; // Replay harness

pub use checkpoint::{
    CheckpointError, CheckpointRecord, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore, CHECKPOINT_FILE_NAME,
};
pub use cow::{
    CowLogConfig, CowLogConfigError, CowLogContents, CowLogCounters, CowLogError, CowLogReader,
    CowLogWriter, DurabilityMode, ReadStopReason,
};
pub use format::{
    CowLogHeader, CowRecord, CowRecordError, COW_HEADER_SIZE, COW_LOG_FORMAT_VERSION, COW_MAGIC,
    COW_RECORD_FORMAT_VERSION,
};
pub use sink::{
    CowLogDir, MemoryLogHandle, MemorySink, MemorySinkProvider, SinkProvider, SnapshotSink,
};
pub use testing::{ReplayError, ReplayImage};
