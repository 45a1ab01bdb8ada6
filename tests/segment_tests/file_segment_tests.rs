//! Tests for FileSegment
//!
//! These tests verify:
//! - Creation, persist and read-only reopen of segment files
//! - Update mode continues appending and rewrites the metadata block
//! - Repair rebuilds the index from the data region and stops at damage
//! - Index-only access answers existence like a read-only open
//! - In-place invalidation, checksum verification and header checks
//! - Namespace properties files
//! - A key index naming a missing offset list fails lookups of that key

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dhtstore::index::{CuckooConfig, IndexEntry, KeyCuckoo};
use dhtstore::metadata::{encode, MetadataImage, StorageFormat};
use dhtstore::offset_list::OffsetListStore;
use dhtstore::record::{FIXED_HEADER_BYTES, FLAG_INVALIDATED};
use dhtstore::segment::{segment_path, SegmentHeader, DATA_OFFSET, MAX_DATA_SEGMENT_SIZE};
use dhtstore::{
    AccessMode, DhtKey, FileSegment, ManualTimeSource, NamespaceOptions, NamespaceVersionMode,
    PrereadMode, PutOutcome, RecordView, RetrievalOptions, RetrievalType, Segment, SegmentState,
    StoreError, StoredValue, SyncMode, SystemTimeSource, TimeSource, VersionConstraint,
    WritableSegment,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const SEGMENT_SIZE: u32 = 64 * 1024;
const SEGMENT: u32 = 3;

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let ns_dir = temp_dir.path().join("ns");
    (temp_dir, ns_dir)
}

fn key(i: u64) -> DhtKey {
    DhtKey::new(i.rotate_left(17) ^ 0x5EED, i + 1)
}

fn payload(i: u64, version: i64) -> Vec<u8> {
    format!("file-value-{}-version-{}", i, version).into_bytes()
}

fn options(mode: NamespaceVersionMode, format: &str) -> NamespaceOptions {
    NamespaceOptions::builder()
        .version_mode(mode)
        .storage_format(format)
        .build()
}

fn single() -> NamespaceOptions {
    options(NamespaceVersionMode::SingleVersion, "3")
}

fn multi() -> NamespaceOptions {
    options(NamespaceVersionMode::MultiVersion, "3")
}

fn clock() -> Arc<ManualTimeSource> {
    Arc::new(ManualTimeSource::new(2_000_000))
}

fn create(ns_dir: &Path, opts: &NamespaceOptions) -> FileSegment {
    FileSegment::create(ns_dir, SEGMENT, SEGMENT_SIZE, opts, SyncMode::NoSync, clock()).unwrap()
}

fn open_read_only(ns_dir: &Path, opts: &NamespaceOptions) -> FileSegment {
    FileSegment::open_read_only(
        ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        opts,
        PrereadMode::NoPreread,
        clock(),
    )
    .unwrap()
}

fn open_for_update(ns_dir: &Path, opts: &NamespaceOptions) -> FileSegment {
    FileSegment::open_for_data_update(
        ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        opts,
        SyncMode::NoSync,
        clock(),
    )
    .unwrap()
}

fn open_for_repair(ns_dir: &Path, opts: &NamespaceOptions) -> FileSegment {
    FileSegment::open_for_repair(
        ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        opts,
        SyncMode::NoSync,
        clock(),
    )
    .unwrap()
}

fn put(segment: &FileSegment, i: u64, version: i64) -> u32 {
    match segment
        .put(key(i), &StoredValue::new(payload(i, version), version))
        .unwrap()
    {
        PutOutcome::Stored { offset } => offset,
        other => panic!("put of key {} v{} returned {:?}", i, version, other),
    }
}

fn get(segment: &impl Segment, i: u64, constraint: VersionConstraint) -> Option<RecordView> {
    let options = RetrievalOptions::new(RetrievalType::Value).version_constraint(constraint);
    segment.retrieve(&key(i), &options).unwrap().found()
}

fn assert_value(segment: &impl Segment, i: u64, version: i64) {
    let view = get(segment, i, VersionConstraint::GREATEST)
        .unwrap_or_else(|| panic!("key {} missing", i));
    assert_eq!(view.version(), version, "key {}", i);
    assert_eq!(view.payload().as_ref(), &payload(i, version)[..], "key {}", i);
}

/// Overwrite bytes of a segment file in place
fn patch_file(path: &Path, at: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(at)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Create / Persist / Reopen Tests
// =============================================================================

#[test]
fn test_create_put_persist_reopen() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    assert_eq!(segment.access_mode(), AccessMode::Creation);

    for i in 0..50 {
        put(&segment, i, 1);
    }
    segment.persist().unwrap();
    assert_eq!(segment.state(), SegmentState::Persisted);
    assert!(fs::metadata(segment.path()).unwrap().len() > u64::from(SEGMENT_SIZE));

    let reopened = open_read_only(&ns_dir, &opts);
    assert_eq!(reopened.access_mode(), AccessMode::ReadOnly);
    assert_eq!(reopened.stats().keys, 50);
    assert_eq!(reopened.stats().data_region, Some("read-only file mapping"));
    for i in 0..50 {
        assert_value(&reopened, i, 1);
    }
    assert!(get(&reopened, 50, VersionConstraint::GREATEST).is_none());
}

#[test]
fn test_every_format_reopens() {
    for format in ["0", "1", "2", "3"] {
        let (_temp, ns_dir) = setup_temp_dir();
        let opts = options(NamespaceVersionMode::SingleVersion, format);
        let segment = create(&ns_dir, &opts);
        for i in 0..20 {
            put(&segment, i, 1);
        }
        put(&segment, 0, 2);
        segment.persist().unwrap();

        let reopened = open_read_only(&ns_dir, &opts);
        assert_eq!(reopened.stats().storage_format.to_string(), format);
        assert_value(&reopened, 0, 2);
        for i in 1..20 {
            assert_value(&reopened, i, 1);
        }
        let tracked = reopened.stats().invalidated.is_some();
        assert_eq!(tracked, format != "0", "format {}", format);
    }
}

#[test]
fn test_create_refuses_existing_file() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    create(&ns_dir, &opts).persist().unwrap();

    let result = FileSegment::create(&ns_dir, SEGMENT, SEGMENT_SIZE, &opts, SyncMode::NoSync, clock());
    assert!(matches!(result, Err(StoreError::SegmentExists(_))));
}

#[test]
fn test_create_rejects_bad_options() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = options(NamespaceVersionMode::SingleVersion, "7");

    let result = FileSegment::create(&ns_dir, SEGMENT, SEGMENT_SIZE, &opts, SyncMode::NoSync, clock());
    assert!(matches!(result, Err(StoreError::Config(_))));

    let result = FileSegment::create(&ns_dir, SEGMENT, 8, &single(), SyncMode::NoSync, clock());
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[test]
fn test_rejects_unaddressable_segment_size() {
    let (_temp, ns_dir) = setup_temp_dir();
    let too_large = MAX_DATA_SEGMENT_SIZE + 1;

    let result = FileSegment::create(&ns_dir, SEGMENT, too_large, &single(), SyncMode::NoSync, clock());
    assert!(matches!(result, Err(StoreError::Config(_))));
    assert!(!segment_path(&ns_dir, SEGMENT).exists());

    let result =
        FileSegment::open_for_repair(&ns_dir, SEGMENT, u32::MAX, &single(), SyncMode::NoSync, clock());
    assert!(matches!(result, Err(StoreError::Config(_))));
    assert!(!segment_path(&ns_dir, SEGMENT).exists());
}

#[test]
fn test_header_written_at_creation() {
    let (_temp, ns_dir) = setup_temp_dir();
    let segment = create(&ns_dir, &single());
    segment.sync().unwrap();

    let bytes = fs::read(segment_path(&ns_dir, SEGMENT)).unwrap();
    assert_eq!(bytes.len(), SEGMENT_SIZE as usize);

    let header = SegmentHeader::read(&bytes).unwrap();
    assert_eq!(header.segment_number, SEGMENT);
    assert_eq!(header.data_offset, DATA_OFFSET);
    assert_eq!(header.index_offset, SEGMENT_SIZE);
}

#[test]
fn test_read_only_rejects_writes() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    put(&segment, 1, 1);
    segment.persist().unwrap();

    let reopened = open_read_only(&ns_dir, &opts);
    assert!(matches!(
        reopened.put(key(2), &StoredValue::new(b"x".to_vec(), 1)),
        Err(StoreError::ReadOnly(SEGMENT))
    ));
    assert!(matches!(
        reopened.invalidate(&key(1), &VersionConstraint::GREATEST),
        Err(StoreError::ReadOnly(SEGMENT))
    ));
    assert!(matches!(reopened.persist(), Err(StoreError::ReadOnly(SEGMENT))));
    assert_value(&reopened, 1, 1);
}

#[test]
fn test_read_only_requires_metadata() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    put(&segment, 1, 1);
    segment.sync().unwrap();
    segment.close().unwrap();

    let result = FileSegment::open_read_only(
        &ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        &opts,
        PrereadMode::NoPreread,
        clock(),
    );
    assert!(matches!(result, Err(StoreError::Format(_))));
}

#[test]
fn test_open_checks_header() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    create(&ns_dir, &opts).persist().unwrap();

    // Same bytes under another segment number
    fs::copy(segment_path(&ns_dir, SEGMENT), segment_path(&ns_dir, SEGMENT + 1)).unwrap();
    let result = FileSegment::open_read_only(
        &ns_dir,
        SEGMENT + 1,
        SEGMENT_SIZE,
        &opts,
        PrereadMode::NoPreread,
        clock(),
    );
    assert!(matches!(result, Err(StoreError::Format(_))));

    // Bad magic
    patch_file(&segment_path(&ns_dir, SEGMENT), 0, b"XXXX");
    let result = FileSegment::open_read_only(
        &ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        &opts,
        PrereadMode::NoPreread,
        clock(),
    );
    assert!(matches!(result, Err(StoreError::Format(_))));
}

#[test]
fn test_preread_open() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    put(&segment, 1, 1);
    segment.persist().unwrap();

    let reopened = FileSegment::open_read_only(
        &ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        &opts,
        PrereadMode::Preread,
        clock(),
    )
    .unwrap();
    assert_value(&reopened, 1, 1);
}

#[test]
fn test_creation_time_comes_from_file() {
    let (_temp, ns_dir) = setup_temp_dir();
    let segment = create(&ns_dir, &single());
    let now = SystemTimeSource.absolute_time_millis();
    let day = 24 * 60 * 60 * 1000;

    // Not the pinned clock: the file's own timestamps win
    let created = segment.segment_creation_millis();
    assert!((created - now).abs() < day, "created {} now {}", created, now);
}

// =============================================================================
// Update Mode Tests
// =============================================================================

#[test]
fn test_update_after_persist() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    for i in 0..10 {
        put(&segment, i, 1);
    }
    let next_free = segment.stats().next_free;
    segment.persist().unwrap();

    let updated = open_for_update(&ns_dir, &opts);
    assert_eq!(updated.access_mode(), AccessMode::Update);
    assert_eq!(updated.stats().next_free, next_free);
    assert_value(&updated, 3, 1);

    for i in 10..15 {
        put(&updated, i, 1);
    }
    put(&updated, 0, 2);
    assert_eq!(
        updated
            .put(key(1), &StoredValue::new(payload(1, 1), 1))
            .unwrap(),
        PutOutcome::InvalidVersion
    );
    updated.persist().unwrap();

    let reopened = open_read_only(&ns_dir, &opts);
    assert_eq!(reopened.stats().keys, 15);
    assert_value(&reopened, 0, 2);
    for i in 1..15 {
        assert_value(&reopened, i, 1);
    }
    let old = get(&reopened, 0, VersionConstraint::exact(1)).unwrap();
    assert_eq!(old.payload().as_ref(), &payload(0, 1)[..]);
}

#[test]
fn test_update_without_metadata_scans_records() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = multi();
    let segment = create(&ns_dir, &opts);
    for i in 0..10 {
        put(&segment, i, 1);
    }
    put(&segment, 4, 2);
    let next_free = segment.stats().next_free;
    segment.sync().unwrap();
    segment.close().unwrap();

    let updated = open_for_update(&ns_dir, &opts);
    assert_eq!(updated.stats().next_free, next_free);
    assert_eq!(updated.stats().keys, 10);
    assert_value(&updated, 4, 2);
    assert_eq!(get(&updated, 4, VersionConstraint::exact(1)).unwrap().version(), 1);

    put(&updated, 10, 1);
    updated.persist().unwrap();
    assert_value(&open_read_only(&ns_dir, &opts), 10, 1);
}

#[test]
fn test_update_reopen_without_persist_sees_appends() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let path = segment_path(&ns_dir, SEGMENT);
    let segment = create(&ns_dir, &opts);
    for i in 0..5 {
        put(&segment, i, 1);
    }
    segment.persist().unwrap();

    // The stale metadata block is dropped as soon as it is loaded
    let updated = open_for_update(&ns_dir, &opts);
    assert_eq!(fs::metadata(&path).unwrap().len(), u64::from(SEGMENT_SIZE));
    put(&updated, 5, 1);
    put(&updated, 0, 2);
    let next_free = updated.stats().next_free;
    updated.sync().unwrap();
    updated.close().unwrap();

    let reopened = open_for_update(&ns_dir, &opts);
    assert_eq!(reopened.stats().next_free, next_free);
    assert_eq!(reopened.stats().keys, 6);
    assert_value(&reopened, 5, 1);
    assert_value(&reopened, 0, 2);
    assert_eq!(
        reopened
            .put(key(5), &StoredValue::new(payload(5, 1), 1))
            .unwrap(),
        PutOutcome::InvalidVersion
    );
    reopened.persist().unwrap();

    let read_only = open_read_only(&ns_dir, &opts);
    assert_eq!(read_only.stats().keys, 6);
    assert_value(&read_only, 5, 1);
    assert_value(&read_only, 0, 2);
    for i in 1..5 {
        assert_value(&read_only, i, 1);
    }
}

// =============================================================================
// Repair Tests
// =============================================================================

#[test]
fn test_repair_rebuilds_index() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = multi();
    let segment = create(&ns_dir, &opts);
    for i in 0..20 {
        put(&segment, i, 1);
        if i % 4 == 0 {
            put(&segment, i, 2);
        }
    }
    assert!(segment.invalidate(&key(3), &VersionConstraint::GREATEST).unwrap());
    segment.persist().unwrap();

    let repaired = open_for_repair(&ns_dir, &opts);
    assert_eq!(repaired.access_mode(), AccessMode::Repair);
    // Old metadata block is cut off
    assert_eq!(
        fs::metadata(repaired.path()).unwrap().len(),
        u64::from(SEGMENT_SIZE)
    );

    let stats = repaired.stats();
    assert_eq!(stats.keys, 20);
    assert_eq!(stats.invalidated, Some(1));
    for i in (0..20).filter(|i| *i != 3) {
        assert_value(&repaired, i, if i % 4 == 0 { 2 } else { 1 });
    }
    assert!(get(&repaired, 3, VersionConstraint::GREATEST).is_none());
    assert_eq!(get(&repaired, 8, VersionConstraint::exact(1)).unwrap().version(), 1);

    repaired.persist().unwrap();
    let reopened = open_read_only(&ns_dir, &opts);
    assert_eq!(reopened.stats().keys, 20);
    assert_eq!(reopened.stats().invalidated, Some(1));
}

#[test]
fn test_repair_stops_at_damaged_record() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    put(&segment, 0, 1);
    put(&segment, 1, 1);
    let damaged = put(&segment, 2, 1);
    segment.sync().unwrap();
    segment.close().unwrap();

    // Unknown checksum type: the third header no longer parses
    let checksum_type_at = u64::from(damaged) + 16 + (FIXED_HEADER_BYTES as u64 - 1);
    patch_file(&segment_path(&ns_dir, SEGMENT), checksum_type_at, &[9]);

    let repaired = open_for_repair(&ns_dir, &opts);
    assert_value(&repaired, 0, 1);
    assert_value(&repaired, 1, 1);
    assert!(get(&repaired, 2, VersionConstraint::GREATEST).is_none());
    assert_eq!(repaired.stats().next_free, Some(damaged));

    // The damaged record's space is reused
    assert_eq!(put(&repaired, 2, 1), damaged);
    assert_value(&repaired, 2, 1);
}

#[test]
fn test_repair_creates_missing_file() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();

    let repaired = open_for_repair(&ns_dir, &opts);
    assert_eq!(repaired.stats().keys, 0);
    assert_eq!(repaired.stats().next_free, Some(DATA_OFFSET));

    put(&repaired, 1, 1);
    repaired.persist().unwrap();
    assert_value(&open_read_only(&ns_dir, &opts), 1, 1);
}

// =============================================================================
// Index-Only Tests
// =============================================================================

#[test]
fn test_index_only_matches_read_only_existence() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = multi();
    let segment = create(&ns_dir, &opts);
    for i in 0..40 {
        put(&segment, i, 1);
        if i % 3 == 0 {
            put(&segment, i, 2);
        }
    }
    for i in [5u64, 9, 12] {
        assert!(segment.invalidate(&key(i), &VersionConstraint::GREATEST).unwrap());
    }
    segment.persist().unwrap();

    let read_only = open_read_only(&ns_dir, &opts);
    let index_only =
        FileSegment::open_read_index_only(&ns_dir, SEGMENT, SEGMENT_SIZE, &opts, clock()).unwrap();
    assert_eq!(index_only.access_mode(), AccessMode::ReadIndexOnly);
    assert_eq!(index_only.stats().data_region, None);

    let constraints = [
        VersionConstraint::GREATEST,
        VersionConstraint::LEAST,
        VersionConstraint::exact(1),
        VersionConstraint::exact(2),
        VersionConstraint::exact(3),
    ];
    for i in 0..50 {
        for constraint in &constraints {
            assert_eq!(
                index_only.exists(&key(i), constraint).unwrap(),
                read_only.exists(&key(i), constraint).unwrap(),
                "key {} constraint {:?}",
                i,
                constraint
            );
        }
    }

    assert!(matches!(
        index_only.retrieve(&key(1), &RetrievalOptions::new(RetrievalType::Value)),
        Err(StoreError::DataNotMapped(SEGMENT))
    ));
    assert_eq!(
        index_only
            .stored_length(&key(1), &VersionConstraint::GREATEST)
            .unwrap(),
        read_only
            .stored_length(&key(1), &VersionConstraint::GREATEST)
            .unwrap()
    );
}

#[test]
fn test_index_only_demoted_for_single_version() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    put(&segment, 1, 1);
    segment.persist().unwrap();

    let opened =
        FileSegment::open_read_index_only(&ns_dir, SEGMENT, SEGMENT_SIZE, &opts, clock()).unwrap();
    assert_eq!(opened.access_mode(), AccessMode::ReadOnly);
    assert_value(&opened, 1, 1);
}

#[test]
fn test_index_only_demoted_for_legacy_format() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = options(NamespaceVersionMode::MultiVersion, "0");
    let segment = create(&ns_dir, &opts);
    put(&segment, 1, 1);
    segment.persist().unwrap();

    let opened =
        FileSegment::open_read_index_only(&ns_dir, SEGMENT, SEGMENT_SIZE, &opts, clock()).unwrap();
    assert_eq!(opened.access_mode(), AccessMode::ReadOnly);
    assert_value(&opened, 1, 1);
}

// =============================================================================
// Invalidation & Corruption Tests
// =============================================================================

#[test]
fn test_invalidation_is_in_place() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    let offset = put(&segment, 1, 1);
    put(&segment, 2, 1);
    segment.persist().unwrap();
    let path = segment_path(&ns_dir, SEGMENT);
    let size_before = fs::metadata(&path).unwrap().len();

    let updated = open_for_update(&ns_dir, &opts);
    assert!(updated.invalidate(&key(1), &VersionConstraint::GREATEST).unwrap());
    updated.persist().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert!(bytes.len() as u64 >= size_before);
    let record = offset as usize;
    let flags_at = record + 16 + 36;
    assert_ne!(bytes[flags_at] & FLAG_INVALIDATED, 0);
    let payload_at = record + 16 + FIXED_HEADER_BYTES + 4;
    assert_eq!(&bytes[payload_at..payload_at + payload(1, 1).len()], &payload(1, 1)[..]);

    let reopened = open_read_only(&ns_dir, &opts);
    assert!(get(&reopened, 1, VersionConstraint::GREATEST).is_none());
    let options = RetrievalOptions::new(RetrievalType::Value).return_invalidations(true);
    assert!(reopened.retrieve(&key(1), &options).unwrap().found().unwrap().is_invalidated());
    assert_value(&reopened, 2, 1);
}

#[test]
fn test_checksum_mismatch_is_corrupt() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = create(&ns_dir, &opts);
    let offset = put(&segment, 1, 1);
    segment.persist().unwrap();

    let payload_at = u64::from(offset) + 16 + FIXED_HEADER_BYTES as u64 + 4;
    patch_file(&segment_path(&ns_dir, SEGMENT), payload_at, b"#");

    let reopened = open_read_only(&ns_dir, &opts);
    let verified = RetrievalOptions::new(RetrievalType::Value).verify_checksums(true);
    assert!(reopened.retrieve(&key(1), &verified).unwrap().is_corrupt());

    // Without verification the altered bytes come back as stored
    let view = get(&reopened, 1, VersionConstraint::GREATEST).unwrap();
    assert_eq!(view.payload()[0], b'#');
    assert!(!view.checksum_matches());
}

#[test]
fn test_sync_mode_puts_survive_close() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = single();
    let segment = FileSegment::create(
        &ns_dir,
        SEGMENT,
        SEGMENT_SIZE,
        &opts,
        SyncMode::Sync,
        clock(),
    )
    .unwrap();
    for i in 0..5 {
        put(&segment, i, 1);
    }
    assert!(segment.invalidate(&key(4), &VersionConstraint::GREATEST).unwrap());
    segment.close().unwrap();
    assert_eq!(segment.state(), SegmentState::Closed);

    let updated = open_for_update(&ns_dir, &opts);
    for i in 0..4 {
        assert_value(&updated, i, 1);
    }
    assert!(get(&updated, 4, VersionConstraint::GREATEST).is_none());
}

// =============================================================================
// Namespace Properties Tests
// =============================================================================

#[test]
fn test_properties_round_trip() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = NamespaceOptions::builder()
        .storage_format("2")
        .version_mode(NamespaceVersionMode::MultiVersion)
        .segment_size(4096)
        .build();

    opts.write_properties(&ns_dir).unwrap();
    assert!(NamespaceOptions::properties_path(&ns_dir).exists());
    assert_eq!(NamespaceOptions::read_properties(&ns_dir).unwrap(), opts);
}

#[test]
fn test_properties_rejects_garbage() {
    let (_temp, ns_dir) = setup_temp_dir();
    fs::create_dir_all(&ns_dir).unwrap();
    fs::write(NamespaceOptions::properties_path(&ns_dir), [1u8, 2, 3]).unwrap();

    assert!(matches!(
        NamespaceOptions::read_properties(&ns_dir),
        Err(StoreError::Serialization(_))
    ));
    assert!(NamespaceOptions::read_properties(&ns_dir.join("missing")).is_err());
}

// =============================================================================
// Damaged Index Tests
// =============================================================================

#[test]
fn test_dangling_offset_list_reference_is_fatal() {
    let (_temp, ns_dir) = setup_temp_dir();
    let opts = multi();
    let path = segment_path(&ns_dir, SEGMENT);
    let segment = create(&ns_dir, &opts);
    put(&segment, 1, 1);
    segment.persist().unwrap();

    // Replace the metadata with one whose index names list 5 of an empty store
    let mut index = KeyCuckoo::new(CuckooConfig::new(64, 4, 4, 32)).unwrap();
    index.put(key(1), IndexEntry::List(5)).unwrap();
    let invalidated = BTreeSet::new();
    let block = encode(
        StorageFormat::LTV_INDEXED_LENGTHS,
        &MetadataImage {
            index: index.to_bytes(),
            offset_lists: OffsetListStore::new().to_bytes(),
            invalidated: &invalidated,
            lengths: None,
        },
    );
    let mut bytes = fs::read(&path).unwrap();
    bytes.truncate(SEGMENT_SIZE as usize);
    bytes.extend_from_slice(&block);
    fs::write(&path, &bytes).unwrap();

    let read_only = open_read_only(&ns_dir, &opts);
    let options = RetrievalOptions::new(RetrievalType::Value);
    assert!(matches!(
        read_only.retrieve(&key(1), &options),
        Err(StoreError::InvalidOffsetList { index: 5, count: 0 })
    ));
    assert!(matches!(
        read_only.exists(&key(1), &VersionConstraint::GREATEST),
        Err(StoreError::InvalidOffsetList { index: 5, count: 0 })
    ));
    // Keys the index does not know are unaffected
    assert!(!read_only.exists(&key(2), &VersionConstraint::GREATEST).unwrap());

    let index_only =
        FileSegment::open_read_index_only(&ns_dir, SEGMENT, SEGMENT_SIZE, &opts, clock()).unwrap();
    assert_eq!(index_only.access_mode(), AccessMode::ReadIndexOnly);
    assert!(matches!(
        index_only.exists(&key(1), &VersionConstraint::GREATEST),
        Err(StoreError::InvalidOffsetList { index: 5, count: 0 })
    ));
}
