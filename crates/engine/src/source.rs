//! Block-addressable read access to existing partition images.
//!
//! The partition writer reads the source partition (and, after a verification
//! failure, its error-correcting replica) through [`BlockSource`]. Reads are
//! positional, so a source never carries a shared seek offset.

use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read-only, positional byte source.
pub trait BlockSource: Send {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

impl<T: BlockSource + ?Sized> BlockSource for Box<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        (**self).read_exact_at(buf, offset)
    }
}

fn check_bounds(offset: u64, len: usize, total: u64) -> io::Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "read range overflows u64"))?;
    if end > total {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "read out of bounds: offset={} len={} source_len={}",
                offset, len, total
            ),
        ));
    }
    Ok(())
}

/// File-backed source using `pread`.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Open `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(FileSource { file, path, len })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for FileSource {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)
    }
}

#[derive(Debug)]
struct MemoryImage {
    bytes: Vec<u8>,
    reads: u64,
    fail_reads: bool,
}

/// In-memory source. Clones share the image, so a test can keep a clone to
/// corrupt blocks or count reads after handing the source to a writer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    image: Arc<Mutex<MemoryImage>>,
}

impl MemorySource {
    /// Source over `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        MemorySource {
            image: Arc::new(Mutex::new(MemoryImage {
                bytes,
                reads: 0,
                fail_reads: false,
            })),
        }
    }

    /// Number of `read_exact_at` calls so far.
    pub fn read_count(&self) -> u64 {
        self.image.lock().reads
    }

    /// XOR every byte of `[offset, offset + len)` with `0xFF`.
    pub fn corrupt(&self, offset: usize, len: usize) {
        let mut image = self.image.lock();
        let end = (offset + len).min(image.bytes.len());
        for byte in &mut image.bytes[offset.min(end)..end] {
            *byte ^= 0xFF;
        }
    }

    /// Make every subsequent read fail with an I/O error.
    pub fn fail_reads(&self, fail: bool) {
        self.image.lock().fail_reads = fail;
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.lock().bytes.clone()
    }
}

impl BlockSource for MemorySource {
    fn len_bytes(&self) -> u64 {
        self.image.lock().bytes.len() as u64
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut image = self.image.lock();
        image.reads += 1;
        if image.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        check_bounds(offset, buf.len(), image.bytes.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&image.bytes[start..start + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_source_reads_and_bounds() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(source.len_bytes(), 8);

        let mut buf = [0u8; 3];
        source.read_exact_at(&mut buf, 4).unwrap();
        assert_eq!(buf, [5, 6, 7]);

        let err = source.read_exact_at(&mut buf, 6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_memory_source_shared_state() {
        let source = MemorySource::new(vec![0u8; 16]);
        let view = source.clone();
        view.corrupt(4, 4);

        let mut buf = [0u8; 8];
        source.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(view.read_count(), 1);

        view.fail_reads(true);
        assert!(source.read_exact_at(&mut buf, 0).is_err());
    }

    #[test]
    fn test_boxed_source() {
        let boxed: Box<dyn BlockSource> = Box::new(MemorySource::new(vec![9u8; 4]));
        assert_eq!(boxed.len_bytes(), 4);
        let mut buf = [0u8; 2];
        boxed.read_exact_at(&mut buf, 2).unwrap();
        assert_eq!(buf, [9, 9]);
    }
}
