//! Record Module
//!
//! Layout of one value record inside a segment's data region.
//!
//! ## Record Format
//! ```text
//! ┌───────────────┬──────────────────────────────┬─────────────────┐
//! │ Key (16)      │ Header (39 + checksum)       │ Payload         │
//! └───────────────┴──────────────────────────────┴─────────────────┘
//!                 │◄──────────── stored_length ───────────────────►│
//! ```
//!
//! Records are immutable once appended. The only byte ever rewritten is
//! the flags byte, when a record is invalidated.

mod header;

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::key::{DhtKey, KEY_BYTES};

pub use header::{
    RecordHeader, FIXED_HEADER_BYTES, FLAG_INVALIDATED, FLAG_SEGMENTED, MAX_HEADER_BYTES,
};
pub(crate) use header::{mark_invalidated, storage_state_at};

// =============================================================================
// Checksums
// =============================================================================

/// Checksum algorithm recorded in a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ChecksumType {
    #[default]
    None = 0,
    Crc32 = 1,
}

impl ChecksumType {
    /// Longest checksum any type produces
    pub const MAX_LEN: usize = 4;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            _ => None,
        }
    }

    /// Checksum length in bytes
    pub fn len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 => 4,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Compute the checksum of `payload`
    pub fn compute(self, payload: &[u8]) -> [u8; Self::MAX_LEN] {
        match self {
            Self::None => [0u8; Self::MAX_LEN],
            Self::Crc32 => crc32fast::hash(payload).to_be_bytes(),
        }
    }
}

// =============================================================================
// Creator Identity
// =============================================================================

/// Identity of the node/process that created a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValueCreator {
    ip: [u8; 4],
    id: u32,
}

impl ValueCreator {
    pub const BYTES: usize = 8;

    pub fn new(ip: Ipv4Addr, id: u32) -> Self {
        Self { ip: ip.octets(), id }
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let mut out = [0u8; Self::BYTES];
        out[..4].copy_from_slice(&self.ip);
        out[4..].copy_from_slice(&self.id.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; Self::BYTES]) -> Self {
        Self {
            ip: [bytes[0], bytes[1], bytes[2], bytes[3]],
            id: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

// =============================================================================
// Values To Store
// =============================================================================

/// A value handed to a segment's `put`
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub(crate) payload: Bytes,
    pub(crate) version: i64,
    pub(crate) creation_time: Option<i64>,
    pub(crate) creator: ValueCreator,
    pub(crate) checksum_type: ChecksumType,
    pub(crate) storage_state: u8,
    pub(crate) segmented: bool,
    pub(crate) uncompressed_length: Option<u32>,
}

impl StoredValue {
    /// A CRC32-checksummed value; creation time is stamped by the segment
    pub fn new(payload: impl Into<Bytes>, version: i64) -> Self {
        Self {
            payload: payload.into(),
            version,
            creation_time: None,
            creator: ValueCreator::default(),
            checksum_type: ChecksumType::Crc32,
            storage_state: 0,
            segmented: false,
            uncompressed_length: None,
        }
    }

    pub fn creation_time(mut self, millis: i64) -> Self {
        self.creation_time = Some(millis);
        self
    }

    pub fn creator(mut self, creator: ValueCreator) -> Self {
        self.creator = creator;
        self
    }

    pub fn checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }

    pub fn storage_state(mut self, state: u8) -> Self {
        self.storage_state = state;
        self
    }

    /// Mark the payload as the descriptor of a segmented value
    pub fn segmented(mut self, segmented: bool) -> Self {
        self.segmented = segmented;
        self
    }

    /// Original length when the payload was compressed by the caller
    pub fn uncompressed_length(mut self, length: u32) -> Self {
        self.uncompressed_length = Some(length);
        self
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Header length for this value
    pub fn metadata_length(&self) -> usize {
        FIXED_HEADER_BYTES + self.checksum_type.len()
    }

    /// Bytes the record occupies in the data region, key included
    pub fn record_length(&self) -> usize {
        KEY_BYTES + self.metadata_length() + self.payload.len()
    }

    /// Build the header this value will be written with
    pub(crate) fn header(&self, creation_time: i64) -> RecordHeader {
        let compressed_length = self.payload.len() as u32;
        let mut flags = 0;
        if self.segmented {
            flags |= FLAG_SEGMENTED;
        }
        RecordHeader {
            stored_length: (self.metadata_length() + self.payload.len()) as u32,
            compressed_length,
            uncompressed_length: self.uncompressed_length.unwrap_or(compressed_length),
            version: self.version,
            creation_time,
            creator: self.creator,
            flags,
            storage_state: self.storage_state,
            checksum_type: self.checksum_type,
            checksum: self.checksum_type.compute(&self.payload),
        }
    }

    /// Encode key, header and payload into `buf` (exactly `record_length` bytes)
    pub(crate) fn encode_into(&self, key: &DhtKey, header: &RecordHeader, buf: &mut [u8]) {
        let metadata_length = header.metadata_length();
        buf[..KEY_BYTES].copy_from_slice(&key.to_bytes());
        header.write(&mut buf[KEY_BYTES..KEY_BYTES + metadata_length]);
        buf[KEY_BYTES + metadata_length..].copy_from_slice(&self.payload);
    }
}

// =============================================================================
// Retrieved Records
// =============================================================================

/// Read-only view of a stored record, starting at its header
///
/// For existence/metadata retrievals of unsegmented records the view stops
/// at the end of the header and the payload is empty.
#[derive(Debug, Clone)]
pub struct RecordView {
    offset: u32,
    header: RecordHeader,
    bytes: Bytes,
}

impl RecordView {
    pub(crate) fn new(offset: u32, header: RecordHeader, bytes: Bytes) -> Self {
        Self { offset, header, bytes }
    }

    /// Data-region offset of the record (key included)
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn version(&self) -> i64 {
        self.header.version
    }

    pub fn creation_time(&self) -> i64 {
        self.header.creation_time
    }

    pub fn is_invalidated(&self) -> bool {
        self.header.is_invalidated()
    }

    /// Header and (if retrieved) payload bytes
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Payload bytes; empty when only metadata was retrieved
    pub fn payload(&self) -> Bytes {
        let start = self.header.metadata_length().min(self.bytes.len());
        self.bytes.slice(start..)
    }

    /// Whether the payload matches the stored checksum
    pub fn checksum_matches(&self) -> bool {
        let payload = self.payload();
        let computed = self.header.checksum_type.compute(&payload);
        computed[..self.header.checksum_type.len()] == *self.header.checksum()
    }
}
