//! Offset → stored-length index
//!
//! Kept only by storage formats that index record lengths, so a reader can
//! learn a record's size without touching the data region.

use std::collections::BTreeMap;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LengthIndex {
    lengths: BTreeMap<u32, u32>,
}

impl LengthIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offset: u32, stored_length: u32) {
        self.lengths.insert(offset, stored_length);
    }

    pub fn get(&self, offset: u32) -> Option<u32> {
        self.lengths.get(&offset).copied()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// `count u32` then `(offset u32, length u32)` pairs, little-endian
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.lengths.len() * 8);
        out.extend_from_slice(&(self.lengths.len() as u32).to_le_bytes());
        for (offset, length) in &self.lengths {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&length.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let count = read_u32(buf, 0)? as usize;
        let mut lengths = BTreeMap::new();
        for i in 0..count {
            let at = 4 + i * 8;
            lengths.insert(read_u32(buf, at)?, read_u32(buf, at + 4)?);
        }
        Ok(Self { lengths })
    }
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| StoreError::Format(format!("length index truncated at byte {}", at)))
}
