//! Delta operations
//!
//! A [`DeltaOperation`] is one step of the payload plan: how to produce a set
//! of destination blocks, optionally from a set of source blocks plus an
//! out-of-band data blob. The operation set is closed; callers dispatch with an
//! exhaustive `match` on [`OperationType`].

use crate::error::{Error, Result};
use crate::types::{find_overlap, total_blocks, Extent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 digest bytes.
pub type Sha256Digest = [u8; 32];

/// Delta operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Data blob is the final bytes of the destination extents
    Replace,
    /// Destination extents become zero
    Zero,
    /// Destination extents are discarded (written as zero)
    Discard,
    /// Source blocks move to destination blocks unchanged
    SourceCopy,
    /// Data blob is a bsdiff patch against the source extents
    SourceBsdiff,
    /// Data blob is a compression-aware patch against the source extents
    PuffDiff,
}

impl OperationType {
    /// Whether the operation reads the source partition.
    pub fn needs_source(&self) -> bool {
        matches!(
            self,
            OperationType::SourceCopy | OperationType::SourceBsdiff | OperationType::PuffDiff
        )
    }

    /// Whether the operation comes with an out-of-band data blob.
    pub fn carries_data(&self) -> bool {
        matches!(
            self,
            OperationType::Replace | OperationType::SourceBsdiff | OperationType::PuffDiff
        )
    }

    /// Stable lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Replace => "replace",
            OperationType::Zero => "zero",
            OperationType::Discard => "discard",
            OperationType::SourceCopy => "source_copy",
            OperationType::SourceBsdiff => "source_bsdiff",
            OperationType::PuffDiff => "puffdiff",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delta operation from the payload plan.
///
/// Immutable once dispatched to the partition writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaOperation {
    /// Operation type
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Source extents (only for source-reading operations)
    #[serde(default)]
    pub src_extents: Vec<Extent>,
    /// Destination extents
    pub dst_extents: Vec<Extent>,
    /// Length of the out-of-band data blob in bytes (0 when none)
    #[serde(default)]
    pub data_length: u64,
    /// Expected SHA-256 of the concatenated source extents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_sha256: Option<Sha256Digest>,
}

impl DeltaOperation {
    fn with_parts(
        op_type: OperationType,
        src_extents: Vec<Extent>,
        dst_extents: Vec<Extent>,
        data_length: u64,
    ) -> Self {
        DeltaOperation {
            op_type,
            src_extents,
            dst_extents,
            data_length,
            src_sha256: None,
        }
    }

    /// Zero operation over `dst_extents`.
    pub fn zero(dst_extents: Vec<Extent>) -> Self {
        Self::with_parts(OperationType::Zero, Vec::new(), dst_extents, 0)
    }

    /// Discard operation over `dst_extents`.
    pub fn discard(dst_extents: Vec<Extent>) -> Self {
        Self::with_parts(OperationType::Discard, Vec::new(), dst_extents, 0)
    }

    /// Replace operation with a data blob of `data_length` bytes.
    pub fn replace(dst_extents: Vec<Extent>, data_length: u64) -> Self {
        Self::with_parts(OperationType::Replace, Vec::new(), dst_extents, data_length)
    }

    /// Source copy operation.
    pub fn source_copy(src_extents: Vec<Extent>, dst_extents: Vec<Extent>) -> Self {
        Self::with_parts(OperationType::SourceCopy, src_extents, dst_extents, 0)
    }

    /// Bsdiff operation with a patch of `data_length` bytes.
    pub fn source_bsdiff(src_extents: Vec<Extent>, dst_extents: Vec<Extent>, data_length: u64) -> Self {
        Self::with_parts(OperationType::SourceBsdiff, src_extents, dst_extents, data_length)
    }

    /// Puffdiff operation with a patch of `data_length` bytes.
    pub fn puffdiff(src_extents: Vec<Extent>, dst_extents: Vec<Extent>, data_length: u64) -> Self {
        Self::with_parts(OperationType::PuffDiff, src_extents, dst_extents, data_length)
    }

    /// Attach the expected source digest (builder pattern).
    pub fn with_src_sha256(mut self, digest: Sha256Digest) -> Self {
        self.src_sha256 = Some(digest);
        self
    }

    /// Total destination blocks.
    pub fn dst_blocks(&self) -> u64 {
        total_blocks(&self.dst_extents)
    }

    /// Total source blocks.
    pub fn src_blocks(&self) -> u64 {
        total_blocks(&self.src_extents)
    }

    /// Destination length in bytes.
    pub fn dst_byte_len(&self, block_size: u32) -> Result<u64> {
        self.dst_blocks()
            .checked_mul(block_size as u64)
            .ok_or_else(|| Error::InvalidOperation("destination length overflows u64".into()))
    }

    /// Check the structural invariants of the operation.
    ///
    /// - destination extents are non-empty and disjoint
    /// - source extents are present (and disjoint) exactly for source-reading types
    /// - a source copy moves as many blocks as it writes
    pub fn validate_shape(&self) -> Result<()> {
        if self.dst_extents.is_empty() || self.dst_blocks() == 0 {
            return Err(Error::InvalidOperation(format!(
                "{} operation has no destination blocks",
                self.op_type
            )));
        }
        if let Some((a, b)) = find_overlap(&self.dst_extents) {
            return Err(Error::InvalidOperation(format!(
                "destination extents {} and {} overlap",
                self.dst_extents[a], self.dst_extents[b]
            )));
        }
        if self.op_type.needs_source() {
            if self.src_blocks() == 0 {
                return Err(Error::InvalidOperation(format!(
                    "{} operation has no source blocks",
                    self.op_type
                )));
            }
            if let Some((a, b)) = find_overlap(&self.src_extents) {
                return Err(Error::InvalidOperation(format!(
                    "source extents {} and {} overlap",
                    self.src_extents[a], self.src_extents[b]
                )));
            }
        } else if !self.src_extents.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "{} operation must not carry source extents",
                self.op_type
            )));
        }
        if self.op_type == OperationType::SourceCopy && self.src_blocks() != self.dst_blocks() {
            return Err(Error::length_mismatch(
                "source copy block count",
                self.dst_blocks(),
                self.src_blocks(),
            ));
        }
        for extent in self.src_extents.iter().chain(self.dst_extents.iter()) {
            if extent.end_block().is_none() {
                return Err(Error::InvalidOperation(format!(
                    "extent {} overflows the block address space",
                    extent
                )));
            }
        }
        Ok(())
    }
}
