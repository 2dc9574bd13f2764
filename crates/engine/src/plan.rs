//! Partition plan and context.
//!
//! A [`PartitionPlan`] is the ordered list of delta operations for one
//! partition as produced by the payload parser. A [`PartitionContext`] holds
//! everything else the writer needs for that partition: geometry, where the
//! source lives, and whether the update is interactive.

use crate::source::{BlockSource, FileSource};
use deltacow_core::{validate_block_size, DeltaOperation, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Operations for one partition, in payload order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Partition name (also names the COW log)
    pub partition_name: String,
    /// Target partition size in bytes
    pub target_size: u64,
    /// Delta operations in payload order
    pub operations: Vec<DeltaOperation>,
}

impl PartitionPlan {
    /// Plan with no operations.
    pub fn new(partition_name: impl Into<String>, target_size: u64) -> Self {
        PartitionPlan {
            partition_name: partition_name.into(),
            target_size,
            operations: Vec::new(),
        }
    }

    /// Append an operation (builder pattern).
    pub fn with_operation(mut self, op: DeltaOperation) -> Self {
        self.operations.push(op);
        self
    }

    /// Parse a plan from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Init(format!("invalid partition plan: {}", e)))
    }

    /// Read and parse a JSON plan file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Init(format!("failed to read plan '{}': {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Init(format!("failed to serialize plan: {}", e)))
    }

    /// Target size in blocks.
    pub fn target_blocks(&self, block_size: u32) -> u64 {
        self.target_size / block_size as u64
    }

    /// Check the plan's geometry against `block_size`.
    ///
    /// The block size must be valid, the target a whole number of blocks, and
    /// every destination extent inside the target.
    pub fn validate_geometry(&self, block_size: u32) -> Result<()> {
        validate_block_size(block_size)?;
        if self.partition_name.is_empty() {
            return Err(Error::Init("partition name is empty".to_string()));
        }
        if self.target_size % block_size as u64 != 0 {
            return Err(Error::Init(format!(
                "target size {} is not a multiple of block size {}",
                self.target_size, block_size
            )));
        }
        let target_blocks = self.target_blocks(block_size);
        for (index, op) in self.operations.iter().enumerate() {
            for extent in &op.dst_extents {
                match extent.end_block() {
                    Some(end) if end <= target_blocks => {}
                    _ => {
                        return Err(Error::Init(format!(
                            "operation {} writes extent {} outside the {}-block target",
                            index, extent, target_blocks
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where a source image comes from.
pub enum SourceDescriptor {
    /// Image file (or block device) opened read-only by the writer
    Path(PathBuf),
    /// Already-open source
    Open(Box<dyn BlockSource>),
}

impl SourceDescriptor {
    /// Open the descriptor.
    pub fn open(self) -> std::io::Result<Box<dyn BlockSource>> {
        match self {
            SourceDescriptor::Path(path) => Ok(Box::new(FileSource::open(path)?)),
            SourceDescriptor::Open(source) => Ok(source),
        }
    }
}

impl fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Path(path) => f.debug_tuple("Path").field(path).finish(),
            SourceDescriptor::Open(source) => f
                .debug_struct("Open")
                .field("len_bytes", &source.len_bytes())
                .finish(),
        }
    }
}

impl From<PathBuf> for SourceDescriptor {
    fn from(path: PathBuf) -> Self {
        SourceDescriptor::Path(path)
    }
}

impl<S: BlockSource + 'static> From<Box<S>> for SourceDescriptor {
    fn from(source: Box<S>) -> Self {
        SourceDescriptor::Open(source)
    }
}

/// Per-partition settings, owned by one writer.
#[derive(Debug)]
pub struct PartitionContext {
    /// Block size shared by all extents
    pub block_size: u32,
    /// Source partition
    pub source: Option<SourceDescriptor>,
    /// Error-correcting replica of the source partition
    pub source_ecc: Option<SourceDescriptor>,
    /// Interactive (user-visible) update rather than background
    pub interactive: bool,
}

impl PartitionContext {
    /// Context with no source and background priority.
    pub fn new(block_size: u32) -> Self {
        PartitionContext {
            block_size,
            source: None,
            source_ecc: None,
            interactive: false,
        }
    }

    /// Set the source partition (builder pattern).
    pub fn with_source(mut self, source: impl Into<SourceDescriptor>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the error-correcting replica (builder pattern).
    pub fn with_source_ecc(mut self, replica: impl Into<SourceDescriptor>) -> Self {
        self.source_ecc = Some(replica.into());
        self
    }

    /// Set the interactive flag (builder pattern).
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}
