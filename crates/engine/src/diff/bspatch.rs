//! bsdiff patch application.
//!
//! # Patch Layout
//!
//! ```text
//! ┌──────────────────┬────────────┬────────────┬──────────────┐
//! │ Magic (8)        │ ctrl len(8)│ diff len(8)│ new size (8) │
//! ├──────────────────┴────────────┴────────────┴──────────────┤
//! │ ctrl stream │ diff stream │ extra stream (rest of patch)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Magic is `BSDIFF40` (all three streams bzip2) or `BSDF2` followed by one
//! compressor byte per stream (0 = none, 1 = bzip2). Integers are 8-byte
//! little-endian sign-magnitude. The ctrl stream is a sequence of
//! `(add_len, copy_len, seek)` triples.

use bzip2::read::BzDecoder;
use deltacow_core::{Error, Result};
use std::io::{self, Read};

/// Magic of the classic format.
pub const BSDIFF40_MAGIC: &[u8; 8] = b"BSDIFF40";

/// Magic prefix of the format with per-stream compressors.
pub const BSDF2_MAGIC: &[u8; 5] = b"BSDF2";

/// Header size shared by both formats.
pub const BSDIFF_HEADER_SIZE: usize = 32;

/// Stream compressor in a `BSDF2` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamCompressor {
    /// Stored as is
    None = 0,
    /// bzip2
    Bz2 = 1,
}

impl StreamCompressor {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(StreamCompressor::None),
            1 => Ok(StreamCompressor::Bz2),
            other => Err(decode(format!("unsupported BSDF2 compressor {}", other))),
        }
    }
}

/// Parsed patch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsdiffHeader {
    /// Compressors for the ctrl, diff and extra streams
    pub compressors: [StreamCompressor; 3],
    /// Length of the ctrl stream in the patch
    pub ctrl_len: u64,
    /// Length of the diff stream in the patch
    pub diff_len: u64,
    /// Size of the reconstructed output
    pub new_size: u64,
}

impl BsdiffHeader {
    /// Parse the 32-byte header.
    pub fn parse(patch: &[u8]) -> Result<Self> {
        if patch.len() < BSDIFF_HEADER_SIZE {
            return Err(decode("patch shorter than bsdiff header"));
        }
        let compressors = if &patch[0..8] == BSDIFF40_MAGIC {
            [StreamCompressor::Bz2; 3]
        } else if &patch[0..5] == BSDF2_MAGIC {
            [
                StreamCompressor::from_u8(patch[5])?,
                StreamCompressor::from_u8(patch[6])?,
                StreamCompressor::from_u8(patch[7])?,
            ]
        } else {
            return Err(decode("bad bsdiff magic"));
        };

        let ctrl_len = non_negative(offtin(&patch[8..16]), "ctrl length")?;
        let diff_len = non_negative(offtin(&patch[16..24]), "diff length")?;
        let new_size = non_negative(offtin(&patch[24..32]), "new size")?;
        Ok(BsdiffHeader {
            compressors,
            ctrl_len,
            diff_len,
            new_size,
        })
    }
}

/// Decode an 8-byte little-endian sign-magnitude integer.
pub fn offtin(buf: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    let negative = bytes[7] & 0x80 != 0;
    bytes[7] &= 0x7F;
    let magnitude = u64::from_le_bytes(bytes) as i64;
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode an integer as 8-byte little-endian sign-magnitude.
pub fn offtout(value: i64) -> [u8; 8] {
    let mut bytes = value.unsigned_abs().to_le_bytes();
    if value < 0 {
        bytes[7] |= 0x80;
    }
    bytes
}

/// Apply a bsdiff patch to `old`.
///
/// The header's output size must equal `expected_len`; otherwise nothing is
/// decoded and a `LengthMismatch` is returned.
pub fn apply(old: &[u8], patch: &[u8], expected_len: u64) -> Result<Vec<u8>> {
    let header = BsdiffHeader::parse(patch)?;
    if header.new_size != expected_len {
        return Err(Error::length_mismatch(
            "bsdiff output",
            expected_len,
            header.new_size,
        ));
    }

    let body = &patch[BSDIFF_HEADER_SIZE..];
    let ctrl_end = usize::try_from(header.ctrl_len)
        .ok()
        .filter(|n| *n <= body.len())
        .ok_or_else(|| decode("ctrl stream past end of patch"))?;
    let diff_end = usize::try_from(header.diff_len)
        .ok()
        .and_then(|n| ctrl_end.checked_add(n))
        .filter(|n| *n <= body.len())
        .ok_or_else(|| decode("diff stream past end of patch"))?;

    let mut ctrl = open_stream(header.compressors[0], &body[..ctrl_end]);
    let mut diff = open_stream(header.compressors[1], &body[ctrl_end..diff_end]);
    let mut extra = open_stream(header.compressors[2], &body[diff_end..]);

    let new_size = usize::try_from(header.new_size).map_err(|_| decode("new size too large"))?;
    let mut new = vec![0u8; new_size];
    let mut old_pos: i64 = 0;
    let mut new_pos: usize = 0;
    let mut triple = [0u8; 24];

    while new_pos < new_size {
        read_stream(&mut ctrl, &mut triple, "ctrl")?;
        let add_len = non_negative(offtin(&triple[0..8]), "add length")?;
        let copy_len = non_negative(offtin(&triple[8..16]), "copy length")?;
        let seek = offtin(&triple[16..24]);

        let add_end = checked_end(new_pos, add_len, new_size)?;
        read_stream(&mut diff, &mut new[new_pos..add_end], "diff")?;
        for (i, byte) in new[new_pos..add_end].iter_mut().enumerate() {
            let src = old_pos
                .checked_add(i as i64)
                .ok_or_else(|| decode("old position overflows"))?;
            if src >= 0 && (src as u64) < old.len() as u64 {
                *byte = byte.wrapping_add(old[src as usize]);
            }
        }
        old_pos = old_pos
            .checked_add(add_len as i64)
            .ok_or_else(|| decode("old position overflows"))?;
        new_pos = add_end;

        let copy_end = checked_end(new_pos, copy_len, new_size)?;
        read_stream(&mut extra, &mut new[new_pos..copy_end], "extra")?;
        new_pos = copy_end;

        old_pos = old_pos
            .checked_add(seek)
            .ok_or_else(|| decode("seek overflows"))?;
    }

    Ok(new)
}

fn open_stream<'a>(compressor: StreamCompressor, bytes: &'a [u8]) -> Box<dyn Read + 'a> {
    match compressor {
        StreamCompressor::None => Box::new(bytes),
        StreamCompressor::Bz2 => Box::new(BzDecoder::new(bytes)),
    }
}

fn read_stream(stream: &mut dyn Read, buf: &mut [u8], name: &str) -> Result<()> {
    stream.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => decode(format!("{} stream truncated", name)),
        _ => decode(format!("{} stream corrupt: {}", name, e)),
    })
}

fn checked_end(pos: usize, len: u64, limit: usize) -> Result<usize> {
    usize::try_from(len)
        .ok()
        .and_then(|n| pos.checked_add(n))
        .filter(|end| *end <= limit)
        .ok_or_else(|| decode("control entry runs past the output size"))
}

fn non_negative(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| decode(format!("negative {}", what)))
}

fn decode(msg: impl Into<String>) -> Error {
    Error::Decode(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_bsdf2_patch, make_bsdiff_patch};

    #[test]
    fn test_offtin_sign_magnitude() {
        assert_eq!(offtin(&offtout(0)), 0);
        assert_eq!(offtin(&offtout(12345)), 12345);
        assert_eq!(offtin(&offtout(-7)), -7);
        assert_eq!(offtout(-1)[7], 0x80);
    }

    #[test]
    fn test_apply_bsdiff40() {
        let old = b"the quick brown fox jumps over the lazy dog".to_vec();
        let new = b"the quick brown cat jumps over the lazy dog!!".to_vec();
        let patch = make_bsdiff_patch(&old, &new).unwrap();
        assert_eq!(&patch[0..8], BSDIFF40_MAGIC);
        assert_eq!(apply(&old, &patch, new.len() as u64).unwrap(), new);
    }

    #[test]
    fn test_apply_bsdf2_all_compressors() {
        let old = vec![3u8; 300];
        let mut new = vec![4u8; 200];
        new.extend_from_slice(&[5u8; 200]);
        for compressor in [StreamCompressor::None, StreamCompressor::Bz2] {
            let patch = make_bsdf2_patch(&old, &new, compressor).unwrap();
            assert_eq!(apply(&old, &patch, new.len() as u64).unwrap(), new);
        }
    }

    #[test]
    fn test_declared_size_mismatch() {
        let patch = make_bsdiff_patch(b"abc", b"abcd").unwrap();
        let err = apply(b"abc", &patch, 8).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 8,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_magic_and_truncation() {
        assert!(matches!(apply(b"", b"short", 0), Err(Error::Decode(_))));

        let mut patch = make_bsdiff_patch(b"abc", b"abcd").unwrap();
        patch[0] = b'X';
        assert!(matches!(apply(b"abc", &patch, 4), Err(Error::Decode(_))));

        let patch = make_bsdiff_patch(b"abc", b"abcdefgh").unwrap();
        let truncated = &patch[..patch.len() - 4];
        assert!(matches!(apply(b"abc", truncated, 8), Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_bsdf2_compressor() {
        let mut patch = make_bsdf2_patch(b"a", b"b", StreamCompressor::None).unwrap();
        patch[6] = 2;
        assert!(matches!(apply(b"a", &patch, 1), Err(Error::Decode(_))));
    }

    #[test]
    fn test_control_entry_past_output() {
        // One ctrl triple claiming 100 added bytes for a 4-byte output
        let mut patch = Vec::new();
        patch.extend_from_slice(b"BSDF2\0\0\0");
        patch.extend_from_slice(&offtout(24));
        patch.extend_from_slice(&offtout(0));
        patch.extend_from_slice(&offtout(4));
        patch.extend_from_slice(&offtout(100));
        patch.extend_from_slice(&offtout(0));
        patch.extend_from_slice(&offtout(0));
        assert!(matches!(apply(b"abcd", &patch, 4), Err(Error::Decode(_))));
    }

    #[test]
    fn test_old_position_overflow() {
        // Seek to i64::MAX, then add one byte from the old file
        let mut patch = Vec::new();
        patch.extend_from_slice(b"BSDF2\0\0\0");
        patch.extend_from_slice(&offtout(48));
        patch.extend_from_slice(&offtout(1));
        patch.extend_from_slice(&offtout(1));
        for value in [0, 0, i64::MAX, 1, 0, 0] {
            patch.extend_from_slice(&offtout(value));
        }
        patch.push(0);
        assert!(matches!(apply(b"abcd", &patch, 1), Err(Error::Decode(_))));
    }
}
