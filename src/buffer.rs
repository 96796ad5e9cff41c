//! Bounds-checked access to the raw database bytes.
//!
//! A database is either memory-mapped or read fully into memory. Both
//! variants expose the same read-only byte range; every read goes through
//! [`read_at`], which turns an out-of-range request into
//! [`GeoIpError::TruncatedData`] instead of panicking.
//!
//! # Safety
//!
//! Memory-mapped files are only safe to read while the file on disk is not
//! truncated or rewritten. Replace database files by renaming a new file
//! over the old path; never write into a file that a reader has mapped.

use crate::error::{GeoIpError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// How the database file is brought into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Map the file read-only. Pages are shared between processes and
    /// loaded lazily by the OS. The file must stay unchanged while mapped.
    #[default]
    Mmap,
    /// Read the whole file into an owned buffer
    InMemory,
}

/// Storage for database bytes - either owned or memory-mapped
#[derive(Debug)]
pub enum BufferSource {
    /// Heap buffer (from `OpenMode::InMemory` or `Reader::from_bytes`)
    Owned(Vec<u8>),
    /// Read-only memory map
    Mmap(Mmap),
}

impl BufferSource {
    /// Acquire the bytes of the file at `path`
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        match mode {
            OpenMode::Mmap => {
                let file = File::open(path)?;
                // SAFETY: the mapping is read-only and documented as requiring
                // that the file is not modified while mapped.
                let mmap = unsafe { Mmap::map(&file)? };
                Ok(BufferSource::Mmap(mmap))
            }
            OpenMode::InMemory => Ok(BufferSource::Owned(std::fs::read(path)?)),
        }
    }

    /// Whole buffer as a slice
    pub fn as_slice(&self) -> &[u8] {
        match self {
            BufferSource::Owned(v) => v.as_slice(),
            BufferSource::Mmap(m) => &m[..],
        }
    }

    /// Size of the buffer in bytes
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8]> {
        read_at(self.as_slice(), offset, len)
    }
}

/// Bounds-checked sub-slice of `buf`
#[inline]
pub(crate) fn read_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let truncated = || GeoIpError::TruncatedData {
        offset,
        len,
        size: buf.len(),
    };
    let end = offset.checked_add(len).ok_or_else(truncated)?;
    buf.get(offset..end).ok_or_else(truncated)
}
