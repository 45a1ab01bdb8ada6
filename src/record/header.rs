//! Record header encoding
//!
//! All fields are big-endian. Offsets below are relative to the first
//! byte after the key.
//!
//! ```text
//!  0  stored_length        u32   header + payload
//!  4  compressed_length    u32   payload bytes as stored
//!  8  uncompressed_length  u32
//! 12  version              i64
//! 20  creation_time        i64   millis
//! 28  creator              [u8; 8]
//! 36  flags                u8    INVALIDATED | SEGMENTED
//! 37  storage_state        u8
//! 38  checksum_type        u8
//! 39  checksum             [u8; checksum_type.len()]
//! ```

use crate::key::KEY_BYTES;

use super::{ChecksumType, ValueCreator};

/// Bytes before the checksum
pub const FIXED_HEADER_BYTES: usize = 39;

/// Largest possible header
pub const MAX_HEADER_BYTES: usize = FIXED_HEADER_BYTES + ChecksumType::MAX_LEN;

pub(crate) const STORED_LENGTH_AT: usize = 0;
const COMPRESSED_LENGTH_AT: usize = 4;
const UNCOMPRESSED_LENGTH_AT: usize = 8;
const VERSION_AT: usize = 12;
const CREATION_TIME_AT: usize = 20;
const CREATOR_AT: usize = 28;
pub(crate) const FLAGS_AT: usize = 36;
const STORAGE_STATE_AT: usize = 37;
const CHECKSUM_TYPE_AT: usize = 38;

/// Record has been invalidated
pub const FLAG_INVALIDATED: u8 = 0x01;

/// Record payload describes a value split across several records
pub const FLAG_SEGMENTED: u8 = 0x02;

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub stored_length: u32,
    pub compressed_length: u32,
    pub uncompressed_length: u32,
    pub version: i64,
    pub creation_time: i64,
    pub creator: ValueCreator,
    pub flags: u8,
    pub storage_state: u8,
    pub checksum_type: ChecksumType,
    pub checksum: [u8; ChecksumType::MAX_LEN],
}

impl RecordHeader {
    /// Header length, checksum included
    pub fn metadata_length(&self) -> usize {
        FIXED_HEADER_BYTES + self.checksum_type.len()
    }

    pub fn is_invalidated(&self) -> bool {
        self.flags & FLAG_INVALIDATED != 0
    }

    pub fn is_segmented(&self) -> bool {
        self.flags & FLAG_SEGMENTED != 0
    }

    /// Checksum bytes actually in use
    pub fn checksum(&self) -> &[u8] {
        &self.checksum[..self.checksum_type.len()]
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `None` when the bytes cannot be a header: too short, unknown
    /// checksum type, or lengths that contradict each other.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FIXED_HEADER_BYTES {
            return None;
        }
        let checksum_type = ChecksumType::from_u8(buf[CHECKSUM_TYPE_AT])?;
        let metadata_length = FIXED_HEADER_BYTES + checksum_type.len();
        if buf.len() < metadata_length {
            return None;
        }

        let stored_length = read_u32(buf, STORED_LENGTH_AT);
        let compressed_length = read_u32(buf, COMPRESSED_LENGTH_AT);
        if stored_length as usize != metadata_length + compressed_length as usize {
            return None;
        }

        let mut creator = [0u8; ValueCreator::BYTES];
        creator.copy_from_slice(&buf[CREATOR_AT..CREATOR_AT + ValueCreator::BYTES]);
        let mut checksum = [0u8; ChecksumType::MAX_LEN];
        checksum[..checksum_type.len()].copy_from_slice(&buf[FIXED_HEADER_BYTES..metadata_length]);

        Some(Self {
            stored_length,
            compressed_length,
            uncompressed_length: read_u32(buf, UNCOMPRESSED_LENGTH_AT),
            version: read_i64(buf, VERSION_AT),
            creation_time: read_i64(buf, CREATION_TIME_AT),
            creator: ValueCreator::from_bytes(creator),
            flags: buf[FLAGS_AT],
            storage_state: buf[STORAGE_STATE_AT],
            checksum_type,
            checksum,
        })
    }

    /// Decode the header of the record that starts at `offset` in a data region
    pub fn read_at(data: &[u8], offset: u32) -> Option<Self> {
        let start = offset as usize + KEY_BYTES;
        Self::parse(data.get(start..)?)
    }

    /// Encode into the first [`metadata_length`](Self::metadata_length) bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[STORED_LENGTH_AT..STORED_LENGTH_AT + 4].copy_from_slice(&self.stored_length.to_be_bytes());
        buf[COMPRESSED_LENGTH_AT..COMPRESSED_LENGTH_AT + 4]
            .copy_from_slice(&self.compressed_length.to_be_bytes());
        buf[UNCOMPRESSED_LENGTH_AT..UNCOMPRESSED_LENGTH_AT + 4]
            .copy_from_slice(&self.uncompressed_length.to_be_bytes());
        buf[VERSION_AT..VERSION_AT + 8].copy_from_slice(&self.version.to_be_bytes());
        buf[CREATION_TIME_AT..CREATION_TIME_AT + 8].copy_from_slice(&self.creation_time.to_be_bytes());
        buf[CREATOR_AT..CREATOR_AT + ValueCreator::BYTES].copy_from_slice(&self.creator.to_bytes());
        buf[FLAGS_AT] = self.flags;
        buf[STORAGE_STATE_AT] = self.storage_state;
        buf[CHECKSUM_TYPE_AT] = self.checksum_type as u8;
        buf[FIXED_HEADER_BYTES..self.metadata_length()].copy_from_slice(self.checksum());
    }
}

/// Storage-state byte of the record at `offset`, without decoding the rest
pub(crate) fn storage_state_at(data: &[u8], offset: u32) -> Option<u8> {
    data.get(offset as usize + KEY_BYTES + STORAGE_STATE_AT).copied()
}

/// Set the invalidation flag of the record at `offset` in place
pub(crate) fn mark_invalidated(data: &mut [u8], offset: u32) -> bool {
    match data.get_mut(offset as usize + KEY_BYTES + FLAGS_AT) {
        Some(flags) => {
            *flags |= FLAG_INVALIDATED;
            true
        }
        None => false,
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    i64::from_be_bytes(raw)
}
