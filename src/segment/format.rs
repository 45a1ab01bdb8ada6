//! Segment file layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┬──────────────────┐
//! │ data region (data_segment_size bytes)        │ metadata block   │
//! │┌────────────────┬───────┬───────┬─────┬─────┐│ (written at      │
//! ││ segment header │ rec 0 │ rec 1 │ ... │ 0.. ││  persist)        │
//! │└────────────────┴───────┴───────┴─────┴─────┘│                  │
//! └──────────────────────────────────────────────┴──────────────────┘
//!  0                DATA_OFFSET              index_offset
//! ```
//!
//! Header (big-endian): magic "DSEG" | segment_number u32 | data_offset u32
//! | index_offset u32. Unused space after the last record stays zeroed, so a
//! zero stored length marks the end of the records.

use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::key::{DhtKey, KEY_BYTES};
use crate::record::RecordHeader;

/// Identifies a segment file
pub const SEGMENT_MAGIC: [u8; 4] = *b"DSEG";

/// Bytes occupied by the segment header
pub const SEGMENT_HEADER_BYTES: usize = 16;

/// Offset of the first record
pub const DATA_OFFSET: u32 = SEGMENT_HEADER_BYTES as u32;

/// Largest data region; record offsets must stay non-negative index tokens
pub const MAX_DATA_SEGMENT_SIZE: u32 = i32::MAX as u32;

/// Check that a data region can hold the header and be addressed by the index
pub(crate) fn check_data_segment_size(data_segment_size: u32) -> Result<()> {
    if (data_segment_size as usize) < SEGMENT_HEADER_BYTES {
        return Err(StoreError::Config(format!(
            "data segment size {} cannot hold the segment header",
            data_segment_size
        )));
    }
    if data_segment_size > MAX_DATA_SEGMENT_SIZE {
        return Err(StoreError::Config(format!(
            "data segment size {} exceeds the addressable maximum of {}",
            data_segment_size, MAX_DATA_SEGMENT_SIZE
        )));
    }
    Ok(())
}

/// Path of segment `segment_number` inside a namespace directory
pub fn segment_path(ns_dir: &Path, segment_number: u32) -> PathBuf {
    ns_dir.join(segment_number.to_string())
}

/// Fixed header at the start of every data region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segment_number: u32,
    pub data_offset: u32,

    /// Where the metadata block starts (equals the data region size)
    pub index_offset: u32,
}

impl SegmentHeader {
    pub fn new(segment_number: u32, data_segment_size: u32) -> Self {
        Self {
            segment_number,
            data_offset: DATA_OFFSET,
            index_offset: data_segment_size,
        }
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..8].copy_from_slice(&self.segment_number.to_be_bytes());
        buf[8..12].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[12..16].copy_from_slice(&self.index_offset.to_be_bytes());
    }

    pub fn read(buf: &[u8]) -> Result<Self> {
        let header = buf
            .get(..SEGMENT_HEADER_BYTES)
            .ok_or_else(|| StoreError::Format("segment shorter than its header".to_string()))?;
        if header[0..4] != SEGMENT_MAGIC {
            return Err(StoreError::Format(format!(
                "bad segment magic {:02x?}",
                &header[0..4]
            )));
        }
        let field = |at: usize| {
            u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        Ok(Self {
            segment_number: field(4),
            data_offset: field(8),
            index_offset: field(12),
        })
    }

    /// Check the header against what the caller expects to open
    pub fn check(&self, segment_number: u32, data_segment_size: u32) -> Result<()> {
        if self.segment_number != segment_number {
            return Err(StoreError::Format(format!(
                "segment header names segment {}, expected {}",
                self.segment_number, segment_number
            )));
        }
        if self.data_offset != DATA_OFFSET || self.index_offset != data_segment_size {
            return Err(StoreError::Format(format!(
                "segment {} header offsets data={} index={} do not match size {}",
                segment_number, self.data_offset, self.index_offset, data_segment_size
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Record Scan
// =============================================================================

/// One record found by [`scan_records`]
#[derive(Debug, Clone, Copy)]
pub struct ScannedRecord {
    pub key: DhtKey,
    pub offset: u32,
    pub header: RecordHeader,
}

/// Outcome of walking a data region record by record
#[derive(Debug, Default)]
pub struct RecordScan {
    pub records: Vec<ScannedRecord>,

    /// First byte after the last intact record
    pub end: u32,

    /// Set when the walk stopped at bytes that are not a record
    pub stopped_at_damage: bool,
}

/// Walk records from [`DATA_OFFSET`] until the zeroed tail or damage
pub fn scan_records(data: &[u8]) -> RecordScan {
    let mut scan = RecordScan {
        end: DATA_OFFSET,
        ..RecordScan::default()
    };
    let mut offset = DATA_OFFSET as usize;

    while offset + KEY_BYTES + 4 <= data.len() {
        let stored = &data[offset + KEY_BYTES..offset + KEY_BYTES + 4];
        if stored == [0, 0, 0, 0] {
            break;
        }
        let header = match RecordHeader::read_at(data, offset as u32) {
            Some(header) => header,
            None => {
                scan.stopped_at_damage = true;
                break;
            }
        };
        let next = offset + KEY_BYTES + header.stored_length as usize;
        let key = match DhtKey::from_bytes(&data[offset..]) {
            Some(key) if next <= data.len() => key,
            _ => {
                scan.stopped_at_damage = true;
                break;
            }
        };
        scan.records.push(ScannedRecord {
            key,
            offset: offset as u32,
            header,
        });
        offset = next;
        scan.end = next as u32;
    }
    scan
}
