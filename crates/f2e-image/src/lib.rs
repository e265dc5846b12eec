#![forbid(unsafe_code)]
//! Byte-addressed access to the partition under conversion.
//!
//! The converter core sees the partition as a fixed-length byte range with
//! pread/pwrite semantics. `FileImage` backs that range with a block device
//! or regular file; `MemImage` backs it with a buffer for tests; and
//! `NullWriter` wraps a real image for the dry run, serving reads while
//! silently discarding writes.

use f2e_error::{ConvertError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::trace;

/// Fixed-offset byte I/O over the partition image.
///
/// Reads take `&self`, writes take `&mut self`: phases of the conversion
/// borrow the image mutably one at a time, so exclusive access is enforced
/// by the borrow checker rather than by locks.
pub trait ByteImage {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` at `offset`.
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&mut self) -> Result<()>;
}

fn check_range(len: u64, offset: u64, count: usize) -> Result<()> {
    let end = offset.checked_add(count as u64);
    match end {
        Some(end) if end <= len => Ok(()),
        _ => Err(ConvertError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("access of {count} bytes at offset {offset} exceeds image length {len}"),
        ))),
    }
}

// ── File-backed image ───────────────────────────────────────────────────────

/// Image backed by a block device or regular file, using positional I/O.
pub struct FileImage {
    file: File,
    len: u64,
}

impl FileImage {
    /// Open `path` for read and write and determine its length.
    ///
    /// For block devices `metadata().len()` is zero, so the length is
    /// probed by seeking to the end.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = {
            use std::io::Seek;
            file.seek(io::SeekFrom::End(0))?
        };
        trace!(target: "f2e::image", path = %path.display(), len_bytes = len, "opened image");
        Ok(Self { file, len })
    }
}

impl ByteImage for FileImage {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(self.len, offset, buf.len())?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(self.len, offset, buf.len())?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ── Memory-backed image ─────────────────────────────────────────────────────

/// In-memory image, primarily for tests and fixtures.
#[derive(Debug, Clone)]
pub struct MemImage {
    bytes: Vec<u8>,
}

impl MemImage {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl ByteImage for MemImage {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(self.len_bytes(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(self.len_bytes(), offset, buf.len())?;
        let start = offset as usize;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── Dry-run writer ──────────────────────────────────────────────────────────

/// Wraps a real image for the dry run: reads are served from the underlying
/// image, writes are bounds-checked and then discarded.
pub struct NullWriter<'a, I: ByteImage + ?Sized> {
    inner: &'a I,
}

impl<'a, I: ByteImage + ?Sized> NullWriter<'a, I> {
    #[must_use]
    pub fn new(inner: &'a I) -> Self {
        Self { inner }
    }
}

impl<I: ByteImage + ?Sized> ByteImage for NullWriter<'_, I> {
    fn len_bytes(&self) -> u64 {
        self.inner.len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact_at(offset, buf)
    }

    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(self.len_bytes(), offset, buf.len())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
