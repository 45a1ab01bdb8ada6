//! Error types for dhtstore
//!
//! Missing keys and corrupt records are not errors: they come back as
//! [`Retrieval`](crate::retrieval::Retrieval) variants. Only structural
//! corruption of the index and I/O failures end up here.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for segment operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    /// A negative index entry pointed outside the offset list store.
    /// The index itself is damaged; the segment must be discarded.
    #[error("Invalid offset list index {index} (store holds {count} lists)")]
    InvalidOffsetList { index: u32, count: usize },

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Segment format error: {0}")]
    Format(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Segment file already exists: {}", .0.display())]
    SegmentExists(PathBuf),

    #[error("Segment {0} is read-only")]
    ReadOnly(u32),

    #[error("Segment {0} has been persisted or closed")]
    NotOpen(u32),

    #[error("Segment {0} was opened index-only; data region is not mapped")]
    DataNotMapped(u32),

    #[error("Value of {size} bytes exceeds the unsegmented limit of {limit}")]
    ValueTooLarge { size: usize, limit: u32 },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
