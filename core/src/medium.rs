// Read-only byte medium backing an audit
// Wraps any seekable reader (image file, block device, in-memory buffer)

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, trace};

use crate::AuditError;

/// A fixed-size, random-access, read-only source of bytes.
pub trait ByteMedium {
    /// Total size of the medium in bytes
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Reads that would cross the end of the medium fail with
    /// [`AuditError::OutOfRange`] instead of returning short data.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, AuditError>;
}

/// Medium over any `Read + Seek` source.
pub struct ImageReader<R: Read + Seek> {
    inner: R,
    size: u64,
}

impl<R: Read + Seek> ImageReader<R> {
    /// Wrap a reader; its size is taken from the end position.
    pub fn new(mut inner: R) -> Result<Self, AuditError> {
        let size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, size })
    }
}

impl ImageReader<File> {
    /// Open an image file or device node read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = Self::new(file)?;
        debug!("Opened {} ({} bytes)", path.display(), reader.size);
        Ok(reader)
    }
}

impl ImageReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            inner: Cursor::new(bytes),
            size,
        }
    }
}

impl<R: Read + Seek> ByteMedium for ImageReader<R> {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, AuditError> {
        let end = offset.checked_add(len as u64).ok_or_else(|| {
            AuditError::OutOfRange(format!("read of {} bytes at {:#x} overflows", len, offset))
        })?;
        if end > self.size {
            return Err(AuditError::OutOfRange(format!(
                "read of {} bytes at {:#x} exceeds medium size {}",
                len, offset, self.size
            )));
        }

        trace!("Reading {} bytes at offset {:#x}", len, offset);
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }
}
