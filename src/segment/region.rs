//! Backing storage of a segment's data region

use std::io;
use std::ops::Range;

use bytes::Bytes;
use memmap2::MmapMut;

/// Where a data region's bytes live
pub(crate) enum DataRegion {
    /// Heap buffer, used when an anonymous mapping cannot be made
    Heap(Vec<u8>),

    /// Anonymous mapping of a RAM segment
    Anonymous(MmapMut),

    /// Writable shared mapping of a segment file
    Mapped(MmapMut),

    /// Read-only mapping of a segment file, shared with retrieved views
    Shared(Bytes),
}

impl DataRegion {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Heap(buf) => buf.as_slice(),
            Self::Anonymous(map) | Self::Mapped(map) => &map[..],
            Self::Shared(bytes) => bytes,
        }
    }

    /// Mutable bytes; `None` for read-only regions
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Heap(buf) => Some(buf.as_mut_slice()),
            Self::Anonymous(map) | Self::Mapped(map) => Some(&mut map[..]),
            Self::Shared(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Bytes of `range` for a caller outliving the lock on this region.
    ///
    /// Read-only regions hand out a view of the mapping; writable ones copy.
    pub fn slice(&self, range: Range<usize>) -> Bytes {
        match self {
            Self::Shared(bytes) => bytes.slice(range),
            other => Bytes::copy_from_slice(&other.as_slice()[range]),
        }
    }

    /// Force `len` bytes at `offset` to the file; no-op for memory regions
    pub fn flush_range(&self, offset: usize, len: usize) -> io::Result<()> {
        match self {
            Self::Mapped(map) => map.flush_range(offset, len),
            _ => Ok(()),
        }
    }

    /// Force the whole region to the file; no-op for memory regions
    pub fn flush(&self) -> io::Result<()> {
        match self {
            Self::Mapped(map) => map.flush(),
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heap(_) => "heap",
            Self::Anonymous(_) => "anonymous mapping",
            Self::Mapped(_) => "file mapping",
            Self::Shared(_) => "read-only file mapping",
        }
    }
}
