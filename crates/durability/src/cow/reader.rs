//! COW log reader.
//!
//! The engine never reads its own log back during an update; the reader is
//! used when reopening a log to resume at a label, and by tools and tests that
//! inspect what was written.

use super::CowLogError;
use crate::format::{CowLogHeader, CowRecord, CowRecordError, COW_HEADER_SIZE, MAX_RECORD_LEN};
use deltacow_core::CowEntry;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::warn;

/// Why sequential reading stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// Clean end of file
    EndOfData,
    /// Trailing record cut short (crash while appending)
    PartialRecord {
        /// File offset of the partial record
        offset: u64,
    },
    /// Record failed its CRC
    ChecksumMismatch {
        /// File offset of the corrupt record
        offset: u64,
    },
    /// CRC was valid (or length was absurd) but the record could not be parsed
    ParseError {
        /// File offset of the record
        offset: u64,
        /// Parser message
        detail: String,
    },
}

/// Sequential reader over one COW log file.
pub struct CowLogReader {
    reader: BufReader<File>,
    header: CowLogHeader,
    /// End offset of the last valid record
    position: u64,
    stop_reason: Option<ReadStopReason>,
}

impl CowLogReader {
    /// Open a log and validate its header.
    pub fn open(path: &Path) -> Result<Self, CowLogError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut header_bytes = [0u8; COW_HEADER_SIZE];
        if read_fully(&mut reader, &mut header_bytes)? < COW_HEADER_SIZE {
            return Err(CowLogError::InvalidHeader(format!(
                "{} is shorter than the log header",
                path.display()
            )));
        }
        let header = CowLogHeader::from_bytes(&header_bytes);
        if !header.is_valid() {
            return Err(CowLogError::InvalidHeader(format!(
                "bad magic or version in {}",
                path.display()
            )));
        }

        Ok(CowLogReader {
            reader,
            header,
            position: COW_HEADER_SIZE as u64,
            stop_reason: None,
        })
    }

    /// Log header.
    pub fn header(&self) -> &CowLogHeader {
        &self.header
    }

    /// End offset of the last record returned.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Why reading stopped, once it has.
    pub fn stop_reason(&self) -> Option<&ReadStopReason> {
        self.stop_reason.as_ref()
    }

    /// Read the next valid record.
    ///
    /// Returns `Ok(None)` at end of data and at the first partial or corrupt
    /// record; `stop_reason()` tells which.
    pub fn next_record(&mut self) -> Result<Option<CowRecord>, CowLogError> {
        if self.stop_reason.is_some() {
            return Ok(None);
        }
        let offset = self.position;

        let mut len_buf = [0u8; 4];
        match read_fully(&mut self.reader, &mut len_buf)? {
            0 => return Ok(self.stop(ReadStopReason::EndOfData)),
            4 => {}
            _ => return Ok(self.stop(ReadStopReason::PartialRecord { offset })),
        }

        let length = u32::from_le_bytes(len_buf) as usize;
        if !(6..=MAX_RECORD_LEN).contains(&length) {
            warn!(target: "deltacow::cow_log", offset, length, "Invalid record length");
            return Ok(self.stop(ReadStopReason::ParseError {
                offset,
                detail: format!("invalid record length {}", length),
            }));
        }

        let mut frame = vec![0u8; 4 + length];
        frame[..4].copy_from_slice(&len_buf);
        if read_fully(&mut self.reader, &mut frame[4..])? < length {
            return Ok(self.stop(ReadStopReason::PartialRecord { offset }));
        }

        match CowRecord::from_bytes(&frame) {
            Ok((record, consumed)) => {
                self.position += consumed as u64;
                Ok(Some(record))
            }
            Err(CowRecordError::ChecksumMismatch { .. }) => {
                warn!(target: "deltacow::cow_log", offset, "CRC mismatch, stopping read");
                Ok(self.stop(ReadStopReason::ChecksumMismatch { offset }))
            }
            Err(e) => Ok(self.stop(ReadStopReason::ParseError {
                offset,
                detail: e.to_string(),
            })),
        }
    }

    fn stop(&mut self, reason: ReadStopReason) -> Option<CowRecord> {
        self.stop_reason = Some(reason);
        None
    }

    /// Read every valid record of a log.
    pub fn read_all(path: &Path) -> Result<CowLogContents, CowLogError> {
        let mut reader = Self::open(path)?;
        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        Ok(CowLogContents {
            header: reader.header,
            records,
            valid_end: reader.position,
            stop_reason: reader.stop_reason.unwrap_or(ReadStopReason::EndOfData),
        })
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Everything readable from one log.
#[derive(Debug, Clone)]
pub struct CowLogContents {
    /// Log header
    pub header: CowLogHeader,
    /// Valid records in file order
    pub records: Vec<CowRecord>,
    /// End offset of the last valid record
    pub valid_end: u64,
    /// Why reading stopped
    pub stop_reason: ReadStopReason,
}

impl CowLogContents {
    /// Block entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = &CowEntry> {
        self.records.iter().filter_map(|r| match r {
            CowRecord::Entry(entry) => Some(entry),
            _ => None,
        })
    }

    /// Label values in file order.
    pub fn labels(&self) -> Vec<u64> {
        self.records
            .iter()
            .filter_map(|r| match r {
                CowRecord::Label(label) => Some(*label),
                _ => None,
            })
            .collect()
    }

    /// Whether the log ends with a footer.
    pub fn is_finalized(&self) -> bool {
        matches!(self.records.last(), Some(CowRecord::Footer { .. }))
    }
}
