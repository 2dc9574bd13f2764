//! deltacow - resumable delta-operation to COW log writer
//!
//! deltacow applies the block-level delta operations of a partition update
//! (replace, source copy, bsdiff, puffdiff, zero, discard) as entries in a
//! copy-on-write log that a snapshot merge later folds into the partition.
//!
//! # Quick Start
//!
//! ```ignore
//! use deltacow::{
//!     CowLogDir, DeltaOperation, Extent, FileCheckpointStore, PartitionContext,
//!     PartitionPlan, PartitionWriter,
//! };
//!
//! let plan = PartitionPlan::from_file(Path::new("system.json"))?;
//! let ctx = PartitionContext::new(4096).with_source(PathBuf::from("/dev/block/system_a"));
//! let mut writer = PartitionWriter::new(
//!     ctx,
//!     Box::new(CowLogDir::new("/data/cow")),
//!     Box::new(FileCheckpointStore::new("/data/cow/system")?),
//! );
//!
//! let next = writer.load_checkpoint()?;
//! writer.init(&plan, true, next)?;
//! for (i, op) in plan.operations.iter().enumerate().skip(next) {
//!     writer.apply(op, &blob_for(i))?;
//!     writer.checkpoint(i + 1)?;
//! }
//! writer.finished_install_ops()?;
//! writer.close()?;
//! ```
//!
//! # Architecture
//!
//! - `deltacow-core`: extents, operations, COW entries, errors
//! - `deltacow-durability`: COW log format, sinks, checkpoint stores
//! - `deltacow-engine`: partition writer, patch algorithms, source reading

pub use deltacow_core::{
    CowEntry, DeltaOperation, Error, ErrorCode, Extent, OperationType, Result, Sha256Digest,
    DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
};
pub use deltacow_durability::{
    CheckpointStore, CowLogConfig, CowLogDir, CowLogReader, CowLogWriter, CowRecord,
    DurabilityMode, FileCheckpointStore, MemoryCheckpointStore, MemorySinkProvider, ReplayImage,
    SinkProvider, SnapshotSink,
};
pub use deltacow_engine::{
    sha256, BlockSource, ConfigError, FileSource, MemorySource, PartitionContext, PartitionPlan,
    PartitionWriter, ReaderState, SourceDescriptor, WriterConfig, WriterCounters,
};
