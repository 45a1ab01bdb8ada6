//! Offset List Store
//!
//! Holds every offset list of a segment. Lists are addressed by 1-based
//! index so that the negated index can live in the key index next to
//! plain (non-negative) offsets.
//!
//! ## Serialized Form (little-endian)
//! ```text
//! ┌────────────────┐
//! │ list count (4) │
//! ├────────────────┴─────────────────────────────────────────┐
//! │ entry count (4) | [version (8) | ctime (8) | offset (4)]* │ per list
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::error::{Result, StoreError};

use super::list::{OffsetList, OffsetListEntry, ENTRY_BYTES};

/// All offset lists of one segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetListStore {
    lists: Vec<OffsetList>,
}

impl OffsetListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lists
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Add a list and return its 1-based index
    pub fn new_list(&mut self, list: OffsetList) -> u32 {
        self.lists.push(list);
        self.lists.len() as u32
    }

    /// The list at 1-based `index`.
    ///
    /// An out-of-range index means the key index is damaged; the error is
    /// not recoverable by retrying.
    pub fn get_offset_list(&self, index: u32) -> Result<&OffsetList> {
        index
            .checked_sub(1)
            .and_then(|i| self.lists.get(i as usize))
            .ok_or(StoreError::InvalidOffsetList {
                index,
                count: self.lists.len(),
            })
    }

    /// Append `entry` to the list at 1-based `index`
    pub fn add_to_list(&mut self, index: u32, entry: OffsetListEntry) -> Result<()> {
        let count = self.lists.len();
        let list = index
            .checked_sub(1)
            .and_then(|i| self.lists.get_mut(i as usize))
            .ok_or(StoreError::InvalidOffsetList { index, count })?;
        list.push(entry);
        Ok(())
    }

    /// Lists with their 1-based indices
    pub fn iter(&self) -> impl Iterator<Item = (u32, &OffsetList)> {
        self.lists.iter().enumerate().map(|(i, l)| (i as u32 + 1, l))
    }

    /// Log every list
    pub fn display_for_debug(&self) {
        for (index, list) in self.iter() {
            tracing::debug!("Offset list {} ({} entries)", index, list.len());
            list.display_for_debug();
        }
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Size of [`to_bytes`](Self::to_bytes) output
    pub fn persisted_size_bytes(&self) -> usize {
        4 + self
            .lists
            .iter()
            .map(|l| 4 + l.len() * ENTRY_BYTES)
            .sum::<usize>()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.persisted_size_bytes());
        out.extend_from_slice(&(self.lists.len() as u32).to_le_bytes());
        for list in &self.lists {
            out.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for entry in list {
                out.extend_from_slice(&entry.version.to_le_bytes());
                out.extend_from_slice(&entry.creation_time.to_le_bytes());
                out.extend_from_slice(&entry.offset.to_le_bytes());
            }
        }
        out
    }

    /// Parse [`to_bytes`](Self::to_bytes) output; returns the store and the
    /// number of bytes consumed
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize)> {
        let mut reader = SliceReader { buf, pos: 0 };
        let list_count = reader.u32()?;
        let mut lists = Vec::with_capacity(list_count.min(1 << 20) as usize);
        for _ in 0..list_count {
            let entry_count = reader.u32()? as usize;
            let mut entries = Vec::with_capacity(entry_count.min(1 << 16));
            for _ in 0..entry_count {
                entries.push(OffsetListEntry {
                    version: reader.i64()?,
                    creation_time: reader.i64()?,
                    offset: reader.u32()?,
                });
            }
            lists.push(OffsetList::from_entries(entries));
        }
        Ok((Self { lists }, reader.pos))
    }
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl SliceReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.buf.get(self.pos..self.pos + N).ok_or_else(|| {
            StoreError::Format(format!("offset lists truncated at byte {}", self.pos))
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos += N;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64> {
        self.take::<8>().map(i64::from_le_bytes)
    }
}
