//! Partition update engine for deltacow
//!
//! This crate turns delta operations into COW log entries:
//! - Partition writer: init, per-operation apply, checkpoint, finish, close
//! - Diff/patch applicators: bsdiff (BSDIFF40, BSDF2) and puffdiff
//! - COW operation converter: overlap-safe source copies
//! - Verified source reader with error-correcting replica fallback
//! - Extent writer over the snapshot sink
//!
//! The engine is the only component that knows about:
//! - Source partitions and their replicas
//! - Operation dispatch and resume
//! - Writer configuration (`deltacow.toml`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod convert;
pub mod diff;
pub mod extent_writer;
pub mod partition_writer;
pub mod plan;
pub mod source;
pub mod testing; // Patch builders for tests
pub mod verified_reader;

pub use config::{ConfigError, WriterConfig, CONFIG_FILE_NAME};
pub use convert::{write_all_cow_ops, ConvertStats, CowPlan, PlannedEntry, PlannedKind};
pub use diff::PatchAlgorithm;
pub use extent_writer::SnapshotExtentWriter;
pub use partition_writer::{PartitionWriter, WriterCounters};
pub use plan::{PartitionContext, PartitionPlan, SourceDescriptor};
pub use source::{BlockSource, FileSource, MemorySource};
pub use verified_reader::{sha256, ReaderState, VerifiedRead, VerifiedSourceReader};
