//! Random-access byte providers backing a [`Buffer`](crate::Buffer).
//!
//! A source is the immutable base layer of the piece table: the file (or
//! in-memory blob) the document was opened from. Sources are shared by the
//! live buffer and by every history snapshot through an `Arc`, so the trait
//! is read-only (`&self`) and implementations must be callable concurrently
//! from the window's event loop and from external `State()` readers.

use std::fs::File;
use std::io::{self, ErrorKind};

/// A random-access, read-only byte provider.
///
/// Reads past the end of the data are not an error: implementations return a
/// short (possibly zero) count to signal end-of-source. The buffer layer
/// relies on this to detect where the base document runs out.
pub trait ByteSource: Send + Sync {
    /// Read into `buf` starting at `offset`, returning the number of bytes read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Total size of the source in bytes.
    fn len(&self) -> io::Result<u64>;
}

impl ByteSource for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match positioned_read(self, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// An in-memory [`ByteSource`] for unsaved documents and tests.
#[derive(Debug, Clone, Default)]
pub struct MemSource {
    bytes: Vec<u8>,
}

impl MemSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl From<Vec<u8>> for MemSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for MemSource {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

impl ByteSource for MemSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}
