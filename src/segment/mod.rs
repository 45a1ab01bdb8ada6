//! Segment Module
//!
//! A segment is a fixed-capacity, append-only region of records plus the
//! index structures that find them.
//!
//! ## Variants
//! ```text
//!                  ┌────────────────────────┐
//!                  │  Segment (trait)       │ retrieve, exists, persist,
//!                  │  WritableSegment       │ sync, close, put, invalidate
//!                  └───────────┬────────────┘
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!      ┌─────────────────┐          ┌───────────────────┐
//!      │   RamSegment    │ persist  │   FileSegment     │
//!      │ anonymous mmap  │ ───────► │ mapped file       │
//!      │ (heap fallback) │  (file)  │ Creation / Update │
//!      └─────────────────┘          │ ReadOnly / Repair │
//!                                   │ ReadIndexOnly     │
//!                                   └───────────────────┘
//! ```
//!
//! Both share a `SegmentCore` for resolution and appends; they differ
//! in how the data region is backed and how `persist` writes it out.
//!
//! ## Lifecycle
//! ```text
//! Open ──persist()──► Persisted
//!   └────close()────► Closed
//! ```
//! Only `Open` segments serve requests. Persisted segments are reopened as
//! new [`FileSegment`]s.

mod common;
mod file;
mod format;
mod ram;
mod region;

use crate::error::Result;
use crate::index::IndexEntry;
use crate::key::DhtKey;
use crate::record::StoredValue;
use crate::retrieval::{Retrieval, RetrievalOptions, VersionConstraint};

pub use common::SegmentStats;
pub use file::{AccessMode, FileSegment, PrereadMode, SyncMode};
pub use format::{
    scan_records, segment_path, RecordScan, ScannedRecord, SegmentHeader, DATA_OFFSET,
    MAX_DATA_SEGMENT_SIZE, SEGMENT_HEADER_BYTES, SEGMENT_MAGIC,
};
pub use ram::RamSegment;

/// Lifecycle state of a segment instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Open,
    Persisted,
    Closed,
}

/// Result of appending a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Record appended at `offset`
    Stored { offset: u32 },

    /// Not enough room left; the caller moves on to a new segment
    SegmentFull,

    /// Version not greater than one already stored for the key
    InvalidVersion,
}

/// Read side shared by every segment variant
pub trait Segment: Send + Sync {
    fn segment_number(&self) -> u32;

    /// Resolve `key` and return the requested slice of its record
    fn retrieve(&self, key: &DhtKey, options: &RetrievalOptions) -> Result<Retrieval>;

    /// Whether a non-invalidated record satisfying `constraint` exists
    fn exists(&self, key: &DhtKey, constraint: &VersionConstraint) -> Result<bool>;

    /// Write out the segment and release it
    fn persist(&self) -> Result<()>;

    /// Force the data region to stable storage
    fn sync(&self) -> Result<()>;

    /// Release the segment without persisting
    fn close(&self) -> Result<()>;

    fn segment_creation_millis(&self) -> i64;

    fn state(&self) -> SegmentState;

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Full record at a data-region offset, bypassing the index
    fn retrieve_for_debug(&self, offset: u32) -> Result<Retrieval>;

    /// Index entry for `key` as stored
    fn raw_offset(&self, key: &DhtKey) -> Option<IndexEntry>;

    /// Offset `key` resolves to under `constraint`
    fn resolved_offset(&self, key: &DhtKey, constraint: &VersionConstraint)
        -> Result<Option<u32>>;

    /// Stored length of the record `key` resolves to
    fn stored_length(&self, key: &DhtKey, constraint: &VersionConstraint)
        -> Result<Option<u32>>;

    fn stats(&self) -> SegmentStats;

    /// Log a summary and every offset list at debug level
    fn display_for_debug(&self);
}

/// Write side of segments that accept appends
pub trait WritableSegment: Segment {
    fn put(&self, key: DhtKey, value: &StoredValue) -> Result<PutOutcome>;

    /// Flag the record `key` resolves to as invalidated; bytes stay in place
    fn invalidate(&self, key: &DhtKey, constraint: &VersionConstraint) -> Result<bool>;
}

/// Implements the read-side diagnostics of [`Segment`] by delegating to a
/// `core` field
macro_rules! delegate_to_core {
    () => {
        fn segment_number(&self) -> u32 {
            self.core.segment_number()
        }

        fn retrieve(
            &self,
            key: &crate::key::DhtKey,
            options: &crate::retrieval::RetrievalOptions,
        ) -> crate::error::Result<crate::retrieval::Retrieval> {
            self.core.retrieve(key, options)
        }

        fn exists(
            &self,
            key: &crate::key::DhtKey,
            constraint: &crate::retrieval::VersionConstraint,
        ) -> crate::error::Result<bool> {
            self.core.exists(key, constraint)
        }

        fn segment_creation_millis(&self) -> i64 {
            self.core.creation_millis()
        }

        fn state(&self) -> crate::segment::SegmentState {
            self.core.state()
        }

        fn retrieve_for_debug(
            &self,
            offset: u32,
        ) -> crate::error::Result<crate::retrieval::Retrieval> {
            self.core.retrieve_for_debug(offset)
        }

        fn raw_offset(&self, key: &crate::key::DhtKey) -> Option<crate::index::IndexEntry> {
            self.core.raw_offset(key)
        }

        fn resolved_offset(
            &self,
            key: &crate::key::DhtKey,
            constraint: &crate::retrieval::VersionConstraint,
        ) -> crate::error::Result<Option<u32>> {
            self.core.resolved_offset(key, constraint)
        }

        fn stored_length(
            &self,
            key: &crate::key::DhtKey,
            constraint: &crate::retrieval::VersionConstraint,
        ) -> crate::error::Result<Option<u32>> {
            self.core.stored_length(key, constraint)
        }

        fn stats(&self) -> crate::segment::SegmentStats {
            self.core.stats()
        }

        fn display_for_debug(&self) {
            self.core.display_for_debug()
        }
    };
}
pub(crate) use delegate_to_core;
