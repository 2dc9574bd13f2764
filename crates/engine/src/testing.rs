//! Patch builders for tests
//!
//! Produces valid (if unoptimized) patches in every format the applicators
//! read: one control triple covering the whole output, the common prefix
//! expressed as a diff against the source and the rest stored as extra bytes.

use crate::diff::bspatch::{offtout, StreamCompressor, BSDF2_MAGIC, BSDIFF40_MAGIC};
use crate::diff::puffpatch::{puff, DeflateRange, PUFFDIFF_MAGIC};
use bzip2::write::BzEncoder;
use bzip2::Compression as BzCompression;
use deltacow_core::Result;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

struct Streams {
    ctrl: Vec<u8>,
    diff: Vec<u8>,
    extra: Vec<u8>,
}

fn naive_streams(old: &[u8], new: &[u8]) -> Streams {
    let add_len = old.len().min(new.len());
    let copy_len = new.len() - add_len;

    let mut ctrl = Vec::with_capacity(24);
    ctrl.extend_from_slice(&offtout(add_len as i64));
    ctrl.extend_from_slice(&offtout(copy_len as i64));
    ctrl.extend_from_slice(&offtout(0));

    let diff = new[..add_len]
        .iter()
        .zip(old)
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect();
    let extra = new[add_len..].to_vec();
    Streams { ctrl, diff, extra }
}

fn bz2(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), BzCompression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn assemble(
    magic: &[u8; 8],
    ctrl: Vec<u8>,
    diff: Vec<u8>,
    extra: Vec<u8>,
    new_len: usize,
) -> Vec<u8> {
    let mut patch = magic.to_vec();
    patch.extend_from_slice(&offtout(ctrl.len() as i64));
    patch.extend_from_slice(&offtout(diff.len() as i64));
    patch.extend_from_slice(&offtout(new_len as i64));
    patch.extend_from_slice(&ctrl);
    patch.extend_from_slice(&diff);
    patch.extend_from_slice(&extra);
    patch
}

/// `BSDIFF40` patch turning `old` into `new`.
pub fn make_bsdiff_patch(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let s = naive_streams(old, new);
    Ok(assemble(
        BSDIFF40_MAGIC,
        bz2(&s.ctrl)?,
        bz2(&s.diff)?,
        bz2(&s.extra)?,
        new.len(),
    ))
}

/// `BSDF2` patch with the same compressor for all three streams.
pub fn make_bsdf2_patch(
    old: &[u8],
    new: &[u8],
    compressor: StreamCompressor,
) -> Result<Vec<u8>> {
    let s = naive_streams(old, new);
    let mut magic = [0u8; 8];
    magic[..5].copy_from_slice(BSDF2_MAGIC);
    magic[5..].fill(compressor as u8);
    let encode = |data: Vec<u8>| match compressor {
        StreamCompressor::None => Ok(data),
        StreamCompressor::Bz2 => bz2(&data),
    };
    Ok(assemble(
        &magic,
        encode(s.ctrl)?,
        encode(s.diff)?,
        encode(s.extra)?,
        new.len(),
    ))
}

/// Raw deflate stream of `data`.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// `PUF1` patch turning `source` (with deflate streams at `ranges`) into `target`.
pub fn make_puffdiff_patch(
    source: &[u8],
    ranges: &[DeflateRange],
    target: &[u8],
) -> Result<Vec<u8>> {
    let puffed = puff(source, ranges)?;
    let inner = make_bsdiff_patch(&puffed, target)?;

    let mut patch = PUFFDIFF_MAGIC.to_vec();
    patch.extend_from_slice(&(ranges.len() as u32).to_le_bytes());
    for range in ranges {
        patch.extend_from_slice(&range.offset.to_le_bytes());
        patch.extend_from_slice(&range.length.to_le_bytes());
    }
    patch.extend_from_slice(&(inner.len() as u64).to_le_bytes());
    patch.extend_from_slice(&inner);
    Ok(patch)
}
