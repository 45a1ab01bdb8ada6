//! Tests for record encoding and the retrieval model
//!
//! These tests verify:
//! - Record header layout, parsing and rejection of impossible headers
//! - Checksum computation and verification
//! - Key and creator encodings
//! - Version constraint predicates

use std::net::Ipv4Addr;

use bytes::Bytes;
use dhtstore::record::{
    RecordHeader, FIXED_HEADER_BYTES, FLAG_INVALIDATED, FLAG_SEGMENTED, MAX_HEADER_BYTES,
};
use dhtstore::{
    ChecksumType, DhtKey, RetrievalOptions, RetrievalType, StoredValue, ValueCreator,
    VersionConstraint, VersionSelection,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn header(payload: &[u8], checksum_type: ChecksumType) -> RecordHeader {
    RecordHeader {
        stored_length: (FIXED_HEADER_BYTES + checksum_type.len() + payload.len()) as u32,
        compressed_length: payload.len() as u32,
        uncompressed_length: payload.len() as u32 * 2,
        version: 42,
        creation_time: 1_700_000_000_000,
        creator: ValueCreator::new(Ipv4Addr::new(10, 0, 0, 7), 1234),
        flags: FLAG_SEGMENTED,
        storage_state: 3,
        checksum_type,
        checksum: checksum_type.compute(payload),
    }
}

fn encoded(header: &RecordHeader) -> Vec<u8> {
    let mut buf = vec![0u8; header.metadata_length()];
    header.write(&mut buf);
    buf
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let h = header(b"hello", ChecksumType::Crc32);
    let buf = encoded(&h);

    assert_eq!(buf.len(), FIXED_HEADER_BYTES + 4);
    assert_eq!(buf.len(), MAX_HEADER_BYTES);
    // Big-endian stored length leads the header
    assert_eq!(&buf[0..4], &(h.stored_length).to_be_bytes());
    assert_eq!(&buf[12..20], &42i64.to_be_bytes());
    assert_eq!(buf[36], FLAG_SEGMENTED);
    assert_eq!(buf[37], 3);
    assert_eq!(buf[38], ChecksumType::Crc32 as u8);
}

#[test]
fn test_header_parse() {
    let h = header(b"hello", ChecksumType::Crc32);
    let parsed = RecordHeader::parse(&encoded(&h)).unwrap();

    assert_eq!(parsed, h);
    assert_eq!(parsed.creator.ip(), Ipv4Addr::new(10, 0, 0, 7));
    assert_eq!(parsed.creator.id(), 1234);
    assert!(parsed.is_segmented());
    assert!(!parsed.is_invalidated());
    assert_eq!(parsed.checksum(), &crc32fast::hash(b"hello").to_be_bytes());
}

#[test]
fn test_header_without_checksum() {
    let h = header(b"abc", ChecksumType::None);
    let buf = encoded(&h);

    assert_eq!(buf.len(), FIXED_HEADER_BYTES);
    let parsed = RecordHeader::parse(&buf).unwrap();
    assert_eq!(parsed.metadata_length(), FIXED_HEADER_BYTES);
    assert!(parsed.checksum().is_empty());
}

#[test]
fn test_parse_rejects_inconsistent_lengths() {
    let mut h = header(b"hello", ChecksumType::Crc32);
    h.stored_length += 1;

    assert!(RecordHeader::parse(&encoded(&h)).is_none());
}

#[test]
fn test_parse_rejects_unknown_checksum_type() {
    let mut buf = encoded(&header(b"hello", ChecksumType::Crc32));
    buf[38] = 9;

    assert!(RecordHeader::parse(&buf).is_none());
}

#[test]
fn test_parse_rejects_short_buffer() {
    let buf = encoded(&header(b"hello", ChecksumType::Crc32));

    assert!(RecordHeader::parse(&buf[..FIXED_HEADER_BYTES - 1]).is_none());
    assert!(RecordHeader::parse(&buf[..FIXED_HEADER_BYTES + 2]).is_none());
    // Zeroed space past the last record is not a header
    assert!(RecordHeader::parse(&[0u8; MAX_HEADER_BYTES]).is_none());
}

#[test]
fn test_read_at_skips_key() {
    let h = header(b"payload", ChecksumType::Crc32);
    let mut data = vec![0u8; 200];
    let offset = 40usize;
    data[offset..offset + 16].copy_from_slice(&DhtKey::new(1, 2).to_bytes());
    h.write(&mut data[offset + 16..offset + 16 + h.metadata_length()]);

    assert_eq!(RecordHeader::read_at(&data, offset as u32), Some(h));
    assert_eq!(RecordHeader::read_at(&data, 500), None);
}

#[test]
fn test_flags() {
    let mut h = header(b"x", ChecksumType::None);
    h.flags = FLAG_INVALIDATED;

    assert!(h.is_invalidated());
    assert!(!h.is_segmented());

    h.flags |= FLAG_SEGMENTED;
    assert!(h.is_invalidated() && h.is_segmented());
}

// =============================================================================
// Checksum Tests
// =============================================================================

#[test]
fn test_checksum_types() {
    assert_eq!(ChecksumType::from_u8(0), Some(ChecksumType::None));
    assert_eq!(ChecksumType::from_u8(1), Some(ChecksumType::Crc32));
    assert_eq!(ChecksumType::from_u8(2), None);

    assert!(ChecksumType::None.is_empty());
    assert_eq!(ChecksumType::Crc32.len(), 4);
    assert_eq!(
        ChecksumType::Crc32.compute(b"data"),
        crc32fast::hash(b"data").to_be_bytes()
    );
}

// =============================================================================
// Stored Value Tests
// =============================================================================

#[test]
fn test_stored_value_lengths() {
    let value = StoredValue::new(Bytes::from_static(b"0123456789"), 7);

    assert_eq!(value.version(), 7);
    assert_eq!(value.payload().as_ref(), b"0123456789");
    assert_eq!(value.metadata_length(), FIXED_HEADER_BYTES + 4);
    assert_eq!(value.record_length(), 16 + FIXED_HEADER_BYTES + 4 + 10);

    let unchecked = StoredValue::new(vec![0u8; 10], 7).checksum_type(ChecksumType::None);
    assert_eq!(unchecked.record_length(), 16 + FIXED_HEADER_BYTES + 10);
}

// =============================================================================
// Key And Creator Tests
// =============================================================================

#[test]
fn test_key_encoding() {
    let key = DhtKey::new(0x0102_0304_0506_0708, 0x1112_1314_1516_1718);
    let bytes = key.to_bytes();

    assert_eq!(bytes[0], 0x01);
    assert_eq!(bytes[15], 0x18);
    assert_eq!(DhtKey::from_bytes(&bytes), Some(key));
    assert_eq!(DhtKey::from_bytes(&bytes[..15]), None);
    assert_eq!(key.to_string(), "0102030405060708:1112131415161718");
}

#[test]
fn test_creator_encoding() {
    let creator = ValueCreator::new(Ipv4Addr::new(192, 168, 1, 20), 0xABCD);
    let bytes = creator.to_bytes();

    assert_eq!(&bytes[..4], &[192, 168, 1, 20]);
    assert_eq!(ValueCreator::from_bytes(bytes), creator);
}

// =============================================================================
// Retrieval Model Tests
// =============================================================================

#[test]
fn test_version_constraints() {
    let greatest = VersionConstraint::GREATEST;
    assert!(greatest.is_greatest());
    assert!(greatest.accepts(i64::MIN, i64::MAX));
    assert_eq!(VersionConstraint::default(), greatest);

    let exact = VersionConstraint::exact(5);
    assert!(!exact.is_greatest());
    assert!(exact.matches(5));
    assert!(!exact.matches(4));
    assert_eq!(exact.mode(), VersionSelection::Greatest);

    let bounded = VersionConstraint::at_or_before(1_000);
    assert!(!bounded.is_greatest());
    assert!(bounded.accepts(99, 1_000));
    assert!(!bounded.accepts(99, 1_001));

    let range = VersionConstraint::new(2, 4, VersionSelection::Least);
    assert_eq!((range.min(), range.max()), (2, 4));
    assert!(!range.matches(5));
}

#[test]
fn test_retrieval_options() {
    let options = RetrievalOptions::new(RetrievalType::MetaData)
        .version_constraint(VersionConstraint::exact(3))
        .return_invalidations(true)
        .verify_checksums(true)
        .verify_storage_state(2);

    assert_eq!(options.retrieval_type, RetrievalType::MetaData);
    assert_eq!(options.version_constraint, VersionConstraint::exact(3));
    assert!(options.return_invalidations);
    assert!(options.verify_checksums);
    assert_eq!(options.verify_storage_state, Some(2));

    assert!(RetrievalType::Value.includes_value());
    assert!(RetrievalType::ValueAndMetaData.includes_value());
    assert!(!RetrievalType::MetaData.includes_value());
    assert!(!RetrievalType::Existence.includes_value());
}
