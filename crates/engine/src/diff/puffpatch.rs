//! Compression-aware ("puffed") patch application.
//!
//! Partition images often hold deflate streams; a byte-level diff between two
//! compressed streams is useless. The patch lists the raw-deflate ranges in
//! the source, the source is puffed by inflating those ranges in place, and an
//! inner bsdiff patch rebuilds the target from the puffed bytes.
//!
//! # Patch Layout
//!
//! ```text
//! ┌────────────┬───────────┬────────────────────────────────┬───────────────┬─────────────┐
//! │ Magic (4)  │ Count (4) │ Count × (offset u64, len u64)  │ Inner len (8) │ Inner patch │
//! └────────────┴───────────┴────────────────────────────────┴───────────────┴─────────────┘
//! ```
//!
//! All integers are little-endian. Ranges are sorted and disjoint.

use super::bspatch;
use deltacow_core::{Error, Result};
use flate2::read::DeflateDecoder;
use std::io::Read;

/// Magic bytes: "PUF1"
pub const PUFFDIFF_MAGIC: &[u8; 4] = b"PUF1";

/// Upper bound on the puffed source size.
pub const MAX_PUFFED_LEN: u64 = 1 << 32;

/// Byte range of one raw-deflate stream in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateRange {
    /// Offset of the stream in the source
    pub offset: u64,
    /// Compressed length
    pub length: u64,
}

/// Parsed patch: deflate ranges plus the inner bsdiff patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuffPatch<'a> {
    /// Deflate streams in the source, sorted by offset
    pub ranges: Vec<DeflateRange>,
    /// bsdiff patch from the puffed source to the target
    pub inner: &'a [u8],
}

impl<'a> PuffPatch<'a> {
    /// Parse a patch.
    pub fn parse(patch: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor { buf: patch, pos: 0 };
        if cursor.take(4)? != PUFFDIFF_MAGIC {
            return Err(decode("bad puffdiff magic"));
        }
        let count = cursor.u32()? as usize;
        if count > (patch.len() - cursor.pos) / 16 {
            return Err(decode("deflate range table past end of patch"));
        }

        let mut ranges = Vec::with_capacity(count);
        let mut prev_end = 0u64;
        for _ in 0..count {
            let range = DeflateRange {
                offset: cursor.u64()?,
                length: cursor.u64()?,
            };
            let end = range
                .offset
                .checked_add(range.length)
                .ok_or_else(|| decode("deflate range overflows"))?;
            if range.offset < prev_end {
                return Err(decode("deflate ranges unsorted or overlapping"));
            }
            prev_end = end;
            ranges.push(range);
        }

        let inner_len = cursor.u64()?;
        let inner_len =
            usize::try_from(inner_len).map_err(|_| decode("inner patch length too large"))?;
        let inner = cursor.take(inner_len)?;
        if cursor.pos != patch.len() {
            return Err(decode("trailing bytes after inner patch"));
        }
        Ok(PuffPatch { ranges, inner })
    }
}

/// Inflate the listed ranges of `source` in place.
pub fn puff(source: &[u8], ranges: &[DeflateRange]) -> Result<Vec<u8>> {
    let mut puffed = Vec::with_capacity(source.len());
    let mut pos = 0usize;
    for range in ranges {
        let start = usize::try_from(range.offset).map_err(|_| decode("range offset too large"))?;
        let end = usize::try_from(range.length)
            .ok()
            .and_then(|length| start.checked_add(length))
            .filter(|end| *end <= source.len())
            .ok_or_else(|| decode(format!("deflate range at {} past end of source", start)))?;

        puffed.extend_from_slice(&source[pos..start]);
        let limit = MAX_PUFFED_LEN.saturating_sub(puffed.len() as u64);
        let mut decoder = DeflateDecoder::new(&source[start..end]).take(limit + 1);
        decoder
            .read_to_end(&mut puffed)
            .map_err(|e| decode(format!("deflate stream at {} corrupt: {}", start, e)))?;
        if puffed.len() as u64 > MAX_PUFFED_LEN {
            return Err(decode("puffed source too large"));
        }
        pos = end;
    }
    puffed.extend_from_slice(&source[pos..]);
    Ok(puffed)
}

/// Apply a puffdiff patch to `source`.
pub fn apply(source: &[u8], patch: &[u8], expected_len: u64) -> Result<Vec<u8>> {
    let parsed = PuffPatch::parse(patch)?;
    // Reject a bad declared size before paying for inflation
    let header = bspatch::BsdiffHeader::parse(parsed.inner)?;
    if header.new_size != expected_len {
        return Err(Error::length_mismatch(
            "puffdiff output",
            expected_len,
            header.new_size,
        ));
    }
    let puffed = puff(source, &parsed.ranges)?;
    bspatch::apply(&puffed, parsed.inner, expected_len)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| decode("puffdiff patch truncated"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }
}

fn decode(msg: impl Into<String>) -> Error {
    Error::Decode(msg.into())
}
