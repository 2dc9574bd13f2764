//! Extent Writer
//!
//! Sequential, extent-addressed writer over a [`SnapshotSink`]. Each
//! destination extent receives exactly its byte length, in list order, as
//! Replace entries. The writer holds no retry logic: sink failures are
//! returned as [`Error::Sink`].

use deltacow_core::{Error, Extent, Result};
use deltacow_durability::{CowLogError, SnapshotSink};

pub(crate) fn sink_error(err: CowLogError) -> Error {
    Error::Sink(err.to_string())
}

/// Writes byte buffers across an ordered extent list.
pub struct SnapshotExtentWriter<'a> {
    sink: &'a mut dyn SnapshotSink,
    extents: &'a [Extent],
    next: usize,
    block_size: u32,
    bytes_written: u64,
}

impl<'a> SnapshotExtentWriter<'a> {
    /// Writer for `extents`, in order.
    pub fn new(sink: &'a mut dyn SnapshotSink, extents: &'a [Extent]) -> Self {
        let block_size = sink.block_size();
        SnapshotExtentWriter {
            sink,
            extents,
            next: 0,
            block_size,
            bytes_written: 0,
        }
    }

    /// Write one whole extent.
    ///
    /// `extent` must be the next unwritten extent of the list and `bytes`
    /// exactly its length.
    pub fn write(&mut self, extent: &Extent, bytes: &[u8]) -> Result<()> {
        match self.extents.get(self.next) {
            Some(expected) if expected == extent => {}
            Some(expected) => {
                return Err(Error::InvalidOperation(format!(
                    "extent {} written out of order, expected {}",
                    extent, expected
                )))
            }
            None => {
                return Err(Error::InvalidOperation(format!(
                    "extent {} written past the end of the extent list",
                    extent
                )))
            }
        }
        let expected_len = extent
            .byte_len(self.block_size)
            .ok_or_else(|| Error::InvalidOperation(format!("extent {} overflows", extent)))?;
        if bytes.len() as u64 != expected_len {
            return Err(Error::length_mismatch(
                format!("extent {}", extent),
                expected_len,
                bytes.len() as u64,
            ));
        }

        self.sink
            .append_raw_blocks(extent.start_block, bytes)
            .map_err(sink_error)?;
        self.next += 1;
        self.bytes_written += expected_len;
        Ok(())
    }

    /// Split `data` across every remaining extent.
    ///
    /// The length is checked before anything reaches the sink.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let remaining = self.remaining_bytes();
        if data.len() as u64 != remaining {
            return Err(Error::length_mismatch(
                "extent data",
                remaining,
                data.len() as u64,
            ));
        }
        let mut pos = 0usize;
        let extents = self.extents;
        for extent in &extents[self.next..] {
            let n = (extent.num_blocks * self.block_size as u64) as usize;
            self.write(extent, &data[pos..pos + n])?;
            pos += n;
        }
        Ok(())
    }

    /// Fail unless every extent was written.
    pub fn finish(self) -> Result<u64> {
        if self.next != self.extents.len() {
            return Err(Error::length_mismatch(
                "extent writer",
                self.bytes_written + self.remaining_bytes(),
                self.bytes_written,
            ));
        }
        Ok(self.bytes_written)
    }

    fn remaining_bytes(&self) -> u64 {
        self.extents[self.next..]
            .iter()
            .map(|e| e.num_blocks.saturating_mul(self.block_size as u64))
            .fold(0u64, |acc, n| acc.saturating_add(n))
    }
}
