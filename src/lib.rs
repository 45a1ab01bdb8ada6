//! # dhtstore
//!
//! Per-segment storage engine of a distributed key-value store:
//! - Fixed-capacity, append-only segments of versioned records
//! - Bounded cuckoo index from keys to record offsets
//! - Offset lists for keys with several versions in one segment
//! - RAM segments persisted once; memory-mapped file segments
//! - Self-describing metadata block for reopening segments
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Segment / WritableSegment (traits)             │
//! │          RamSegment            FileSegment                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ retrieve / put / invalidate
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Segment core                            │
//! │   (single writer, concurrent readers, version double-check) │
//! └──────┬───────────────────┬───────────────────────┬──────────┘
//!        │                   │                       │
//!        ▼                   ▼                       ▼
//! ┌─────────────┐    ┌───────────────┐      ┌────────────────┐
//! │ Key index   │    │ Offset lists  │      │  Data region   │
//! │ (cuckoo,    │───►│ (version,     │─────►│  [key|header|  │
//! │  swappable) │    │  ctime, off)  │      │   payload] ... │
//! └─────────────┘    └───────────────┘      └────────────────┘
//!        │                   │
//!        └─────────┬─────────┘
//!                  ▼  persist / reopen
//!          ┌───────────────┐
//!          │ Metadata block│  V0 or LTV (+ header, + length map)
//!          └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod time;

pub mod key;
pub mod record;
pub mod retrieval;
pub mod index;
pub mod offset_list;
pub mod metadata;
pub mod segment;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{NamespaceOptions, NamespaceVersionMode};
pub use error::{Result, StoreError};
pub use key::DhtKey;
pub use record::{ChecksumType, RecordView, StoredValue, ValueCreator};
pub use retrieval::{
    Retrieval, RetrievalOptions, RetrievalType, VersionConstraint, VersionSelection,
};
pub use segment::{
    AccessMode, FileSegment, PrereadMode, PutOutcome, RamSegment, Segment, SegmentState,
    SyncMode, WritableSegment,
};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of dhtstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
