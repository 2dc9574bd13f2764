//! Diff/Patch Applicator
//!
//! Stateless reconstruction of target bytes from source bytes plus a patch.
//! The algorithm is chosen by the operation type, never by sniffing the
//! patch:
//!
//! - `bspatch`: `SourceBsdiff` (BSDIFF40 / BSDF2)
//! - `puffpatch`: `PuffDiff` (deflate-aware, wraps an inner bsdiff patch)

pub mod bspatch;
pub mod puffpatch;

use deltacow_core::{Error, OperationType, Result};

/// Patch algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAlgorithm {
    /// Binary diff
    Bsdiff,
    /// Compression-aware binary diff
    Puffdiff,
}

impl PatchAlgorithm {
    /// Algorithm for a diff operation type.
    pub fn for_operation(op_type: OperationType) -> Option<Self> {
        match op_type {
            OperationType::SourceBsdiff => Some(PatchAlgorithm::Bsdiff),
            OperationType::PuffDiff => Some(PatchAlgorithm::Puffdiff),
            _ => None,
        }
    }

    /// Reconstruct `expected_len` bytes from `source` and `patch`.
    ///
    /// A patch declaring a different output size is a `LengthMismatch`; any
    /// other malformed input is a `Decode` error.
    pub fn apply(self, source: &[u8], patch: &[u8], expected_len: u64) -> Result<Vec<u8>> {
        let output = match self {
            PatchAlgorithm::Bsdiff => bspatch::apply(source, patch, expected_len)?,
            PatchAlgorithm::Puffdiff => puffpatch::apply(source, patch, expected_len)?,
        };
        if output.len() as u64 != expected_len {
            return Err(Error::length_mismatch(
                "patch output",
                expected_len,
                output.len() as u64,
            ));
        }
        Ok(output)
    }
}
