//! Index Module
//!
//! Maps each key of a segment to where its record lives.
//!
//! ## Structure
//! A bounded cuckoo hash table split into sub-tables. Each sub-table hashes
//! the key with its own seed, so a key has exactly one candidate bucket
//! per sub-table:
//!
//! ```text
//!   sub-table 0      sub-table 1      sub-table 2      sub-table 3
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ bucket 0   │   │ bucket 0   │   │ bucket 0   │   │ bucket 0   │
//! │ [s0..sN]   │   │ [s0..sN]   │   │ [s0..sN]   │   │ [s0..sN]   │
//! │ bucket 1   │   │ ...        │   │ ...        │   │ ...        │
//! └────────────┘   └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! A lookup therefore probes at most `num_sub_tables * entries_per_bucket`
//! slots. Insertion may displace residents into their other candidate
//! buckets, up to `cuckoo_limit` explored slots; past that it reports
//! [`TableFull`] and the [`IndexHandle`] swaps in a larger table.
//!
//! ## Entries
//! The stored value is an `i32` token: a non-negative record offset, or
//! the negated 1-based index of an offset list, or [`NO_SUCH_VALUE`].

mod cuckoo;
mod handle;
mod lengths;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, StoreError};

pub use cuckoo::KeyCuckoo;
pub use handle::IndexHandle;
pub use lengths::LengthIndex;

/// Raw token meaning "key not present"
pub const NO_SUCH_VALUE: i32 = i32::MIN;

// =============================================================================
// Entries
// =============================================================================

/// Where a key's record(s) can be found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEntry {
    /// Data-region offset of the only record for the key
    Offset(u32),

    /// 1-based index into the offset list store
    List(u32),
}

impl IndexEntry {
    /// Encode as the on-disk token.
    ///
    /// Offsets never exceed `i32::MAX`; segments refuse data regions larger
    /// than [`MAX_DATA_SEGMENT_SIZE`](crate::segment::MAX_DATA_SEGMENT_SIZE).
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Offset(offset) => offset as i32,
            Self::List(index) => -(index as i32),
        }
    }

    /// Decode an on-disk token; `None` for the "not present" sentinel
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            NO_SUCH_VALUE => None,
            r if r >= 0 => Some(Self::Offset(r as u32)),
            r => Some(Self::List(r.unsigned_abs())),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Geometry of a cuckoo table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuckooConfig {
    pub total_entries: u32,
    pub num_sub_tables: u32,
    pub entries_per_bucket: u32,
    pub cuckoo_limit: u32,
}

impl CuckooConfig {
    pub const fn new(
        total_entries: u32,
        num_sub_tables: u32,
        entries_per_bucket: u32,
        cuckoo_limit: u32,
    ) -> Self {
        Self {
            total_entries,
            num_sub_tables,
            entries_per_bucket,
            cuckoo_limit,
        }
    }

    /// Buckets in each sub-table
    pub fn buckets_per_sub_table(&self) -> u32 {
        self.total_entries / (self.num_sub_tables * self.entries_per_bucket)
    }

    /// Same geometry with twice the capacity
    pub fn doubled(&self) -> Self {
        Self {
            total_entries: self.total_entries * 2,
            ..*self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_sub_tables == 0 || self.entries_per_bucket == 0 || self.cuckoo_limit == 0 {
            return Err(StoreError::Config(format!(
                "cuckoo config fields must be non-zero: {:?}",
                self
            )));
        }
        let per_bucket_row = self
            .num_sub_tables
            .checked_mul(self.entries_per_bucket)
            .ok_or_else(|| StoreError::Config(format!("cuckoo bucket row overflows: {:?}", self)))?;
        if self.total_entries == 0 || self.total_entries % per_bucket_row != 0 {
            return Err(StoreError::Config(format!(
                "total_entries {} is not a multiple of num_sub_tables * entries_per_bucket ({})",
                self.total_entries, per_bucket_row
            )));
        }
        if !self.buckets_per_sub_table().is_power_of_two() {
            return Err(StoreError::Config(format!(
                "buckets per sub-table ({}) must be a power of two",
                self.buckets_per_sub_table()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// No slot could be found for a key within the displacement bound.
///
/// Recovered by [`IndexHandle`]; never leaves the index module through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cuckoo table full: {entries} of {capacity} slots used")]
pub struct TableFull {
    pub entries: usize,
    pub capacity: usize,
}
