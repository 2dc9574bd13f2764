//! Verified Source Reader
//!
//! Reads source extents and checks them against the SHA-256 digest the caller
//! expects. The reader is a two-state machine:
//!
//! ```text
//!   Primary ──(digest mismatch or read error, replica configured)──> Fallback
//! ```
//!
//! The transition happens at most once per session and is never undone. The
//! read that triggers it is retried once against the replica and reports
//! `fell_back = true`; every later read goes straight to the replica.

use crate::source::{BlockSource, FileSource};
use deltacow_core::{total_blocks, Error, Extent, Result, Sha256Digest};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Which descriptor serves reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Reading the source partition
    Primary,
    /// Reading the error-correcting replica for the rest of the session
    Fallback,
}

/// Bytes returned by [`VerifiedSourceReader::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRead {
    /// Concatenated extent contents in list order
    pub data: Vec<u8>,
    /// Whether the bytes matched an expected digest
    pub verified: bool,
    /// Whether this read switched the reader to the replica
    pub fell_back: bool,
}

enum ReplicaSlot {
    Absent,
    /// Opened on first failure
    Pending(PathBuf),
    Open(Box<dyn BlockSource>),
}

/// Source reader with digest verification and replica fallback.
pub struct VerifiedSourceReader {
    block_size: u32,
    primary: Option<Box<dyn BlockSource>>,
    replica: ReplicaSlot,
    state: ReaderState,
    bytes_read: u64,
}

impl VerifiedSourceReader {
    /// Reader over `primary`; `None` when the partition has no source.
    pub fn new(block_size: u32, primary: Option<Box<dyn BlockSource>>) -> Self {
        VerifiedSourceReader {
            block_size,
            primary,
            replica: ReplicaSlot::Absent,
            state: ReaderState::Primary,
            bytes_read: 0,
        }
    }

    /// Use an already-open replica.
    pub fn with_replica(mut self, replica: Box<dyn BlockSource>) -> Self {
        self.replica = ReplicaSlot::Open(replica);
        self
    }

    /// Open the replica at `path` only if a read ever fails verification.
    pub fn with_lazy_replica(mut self, path: PathBuf) -> Self {
        self.replica = ReplicaSlot::Pending(path);
        self
    }

    /// Current state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Whether a primary source is present.
    pub fn has_source(&self) -> bool {
        self.primary.is_some()
    }

    /// Whether a replica is configured, opened or not.
    pub fn has_replica(&self) -> bool {
        !matches!(self.replica, ReplicaSlot::Absent)
    }

    /// Bytes read from either descriptor, retries included.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fail with `InvalidOperation` if any extent reaches past the primary.
    pub fn check_source_extents(&self, extents: &[Extent]) -> Result<()> {
        match &self.primary {
            Some(primary) => check_extents(primary.as_ref(), extents, self.block_size),
            None => Ok(()),
        }
    }

    /// Release both descriptors.
    pub fn close(&mut self) {
        self.primary = None;
        self.replica = ReplicaSlot::Absent;
    }

    /// Read `extents` and verify them against `expected`.
    ///
    /// `expected = None` marks the read best-effort: the bytes are returned
    /// unverified. A read error on the primary is handled like a digest
    /// mismatch when a replica is configured.
    pub fn read(
        &mut self,
        extents: &[Extent],
        expected: Option<&Sha256Digest>,
    ) -> Result<VerifiedRead> {
        if self.state == ReaderState::Fallback {
            let data = self.read_replica(extents)?;
            return self.finish_replica_read(extents, data, expected, false);
        }

        let primary = self.primary.as_ref().ok_or_else(|| {
            Error::InvalidOperation("operation reads the source but no source is open".to_string())
        })?;

        check_extents(primary.as_ref(), extents, self.block_size)?;
        let reason = match read_extents(primary.as_ref(), extents, self.block_size) {
            Ok(data) => {
                self.bytes_read += data.len() as u64;
                match expected {
                    None => {
                        return Ok(VerifiedRead {
                            data,
                            verified: false,
                            fell_back: false,
                        })
                    }
                    Some(digest) if sha256(&data) == *digest => {
                        return Ok(VerifiedRead {
                            data,
                            verified: true,
                            fell_back: false,
                        })
                    }
                    Some(_) => format!("sha256 mismatch on extents {}", fmt_extents(extents)),
                }
            }
            Err(e) if self.has_replica() => {
                format!("read error on extents {}: {}", fmt_extents(extents), e)
            }
            Err(e) => return Err(Error::SourceIo(e)),
        };

        if !self.has_replica() {
            return Err(Error::Integrity(reason));
        }

        warn!(
            target: "deltacow::source",
            reason = %reason,
            "Source verification failed, switching to error-correcting replica"
        );
        self.open_replica()?;
        self.state = ReaderState::Fallback;

        let data = self.read_replica(extents)?;
        self.finish_replica_read(extents, data, expected, true)
    }

    fn open_replica(&mut self) -> Result<()> {
        if let ReplicaSlot::Pending(path) = &self.replica {
            let source = FileSource::open(path).map_err(|e| {
                Error::Integrity(format!(
                    "error-correcting replica {} unavailable: {}",
                    path.display(),
                    e
                ))
            })?;
            debug!(target: "deltacow::source", path = %path.display(), "Opened replica");
            self.replica = ReplicaSlot::Open(Box::new(source));
        }
        Ok(())
    }

    fn read_replica(&mut self, extents: &[Extent]) -> Result<Vec<u8>> {
        let ReplicaSlot::Open(replica) = &self.replica else {
            return Err(Error::Integrity(
                "error-correcting replica is not open".to_string(),
            ));
        };
        check_extents(replica.as_ref(), extents, self.block_size)?;
        let data = read_extents(replica.as_ref(), extents, self.block_size)?;
        self.bytes_read += data.len() as u64;
        Ok(data)
    }

    fn finish_replica_read(
        &self,
        extents: &[Extent],
        data: Vec<u8>,
        expected: Option<&Sha256Digest>,
        fell_back: bool,
    ) -> Result<VerifiedRead> {
        let verified = match expected {
            None => false,
            Some(digest) if sha256(&data) == *digest => true,
            Some(_) => {
                return Err(Error::Integrity(format!(
                    "sha256 mismatch on extents {} after replica fallback",
                    fmt_extents(extents)
                )))
            }
        };
        Ok(VerifiedRead {
            data,
            verified,
            fell_back,
        })
    }
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Sha256Digest {
    Sha256::digest(data).into()
}

/// Reject extents that reach past the end of `source`.
fn check_extents(source: &dyn BlockSource, extents: &[Extent], block_size: u32) -> Result<()> {
    let bs = block_size as u64;
    let len = source.len_bytes();
    for extent in extents {
        let end = extent
            .start_block
            .checked_add(extent.num_blocks)
            .and_then(|blocks| blocks.checked_mul(bs));
        if !matches!(end, Some(end) if end <= len) {
            return Err(Error::InvalidOperation(format!(
                "source extent {} lies past the end of a {}-byte source",
                extent, len
            )));
        }
    }
    Ok(())
}

/// Read the concatenation of `extents` from `source`. Extents must already
/// be checked against the source length.
pub(crate) fn read_extents(
    source: &dyn BlockSource,
    extents: &[Extent],
    block_size: u32,
) -> std::io::Result<Vec<u8>> {
    let bs = block_size as u64;
    let len = total_blocks(extents)
        .checked_mul(bs)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "extent length overflow"))?;
    let mut data = vec![0u8; len as usize];
    let mut pos = 0usize;
    for extent in extents {
        let n = (extent.num_blocks * bs) as usize;
        source.read_exact_at(&mut data[pos..pos + n], extent.start_block * bs)?;
        pos += n;
    }
    Ok(data)
}

fn fmt_extents(extents: &[Extent]) -> String {
    let parts: Vec<String> = extents.iter().map(|e| e.to_string()).collect();
    format!("[{}]", parts.join(", "))
}
