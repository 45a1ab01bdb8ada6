//! Segment Core
//!
//! Everything a segment does that does not depend on how its data region
//! is backed: key resolution, the version double-check, appends,
//! invalidation and building the metadata block.
//!
//! ## Locking
//! ```text
//! reader: data.read ──► index.read ──► offset_lists.read     (held together)
//! writer: writer ──► data.write ──► offset_lists.write ──► index.write
//!                    (append)       (released before the next step)
//! ```
//! A record is complete in the data region before any index structure can
//! reach it, and the writer never holds two of the inner locks at once.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::config::{NamespaceOptions, NamespaceVersionMode};
use crate::error::{Result, StoreError};
use crate::index::{IndexEntry, IndexHandle, LengthIndex};
use crate::key::{DhtKey, KEY_BYTES};
use crate::metadata::{self, MetadataImage, SegmentMetadata, StorageFormat};
use crate::offset_list::{OffsetList, OffsetListEntry, OffsetListStore, ValidityVerifier};
use crate::record::{mark_invalidated, RecordHeader, RecordView, StoredValue, FIXED_HEADER_BYTES};
use crate::retrieval::{Retrieval, RetrievalOptions, RetrievalType, VersionConstraint};
use crate::time::TimeSource;

use super::format::RecordScan;
use super::region::DataRegion;
use super::{PutOutcome, SegmentState};

/// Point-in-time summary of a segment
#[derive(Debug, Clone)]
pub struct SegmentStats {
    pub segment_number: u32,
    pub state: SegmentState,
    pub storage_format: u8,
    pub data_segment_size: u32,

    /// Backing of the data region, `None` when it is not mapped
    pub data_region: Option<&'static str>,

    /// Next append offset, `None` for read-only segments
    pub next_free: Option<u32>,

    pub keys: usize,
    pub index_capacity: usize,
    pub rehash_count: u32,
    pub offset_lists: usize,

    /// `None` when the segment was read from a legacy metadata block
    pub invalidated: Option<usize>,
    pub indexed_lengths: Option<usize>,
    pub creation_millis: i64,
}

pub(crate) struct SegmentCore {
    segment_number: u32,
    data_segment_size: u32,
    format: StorageFormat,
    version_mode: NamespaceVersionMode,

    /// Largest payload accepted without the segmented flag
    max_value_size: u32,
    creation_millis: i64,
    time_source: Arc<dyn TimeSource>,

    /// `None` once released, or for index-only segments
    data: RwLock<Option<DataRegion>>,
    index: IndexHandle,
    offset_lists: RwLock<OffsetListStore>,
    invalidated: RwLock<Option<BTreeSet<u32>>>,
    lengths: Option<RwLock<LengthIndex>>,

    /// Next free offset; `None` when the segment does not accept writes
    writer: Option<Mutex<u32>>,
    sync_on_put: bool,
    state: Mutex<SegmentState>,
}

impl SegmentCore {
    /// Read-only core over `metadata`, with no data region yet
    pub fn new(
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        metadata: SegmentMetadata,
        time_source: Arc<dyn TimeSource>,
        creation_millis: i64,
    ) -> Result<Self> {
        let format = options.format()?;
        let lengths = format
            .lengths_indexed()
            .then(|| RwLock::new(metadata.lengths.unwrap_or_default()));
        Ok(Self {
            segment_number,
            data_segment_size,
            format,
            version_mode: options.version_mode,
            max_value_size: options.segment_size,
            creation_millis,
            time_source,
            data: RwLock::new(None),
            index: IndexHandle::from_table(metadata.index),
            offset_lists: RwLock::new(metadata.offset_lists),
            invalidated: RwLock::new(metadata.invalidated),
            lengths,
            writer: None,
            sync_on_put: false,
            state: Mutex::new(SegmentState::Open),
        })
    }

    pub fn with_data(self, region: DataRegion) -> Self {
        *self.data.write() = Some(region);
        self
    }

    /// Accept appends starting at `next_free`
    pub fn writable(mut self, next_free: u32, sync_on_put: bool) -> Self {
        self.writer = Some(Mutex::new(next_free));
        self.sync_on_put = sync_on_put;
        self
    }

    pub fn segment_number(&self) -> u32 {
        self.segment_number
    }

    pub fn format(&self) -> StorageFormat {
        self.format
    }

    pub fn creation_millis(&self) -> i64 {
        self.creation_millis
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn state(&self) -> SegmentState {
        *self.state.lock()
    }

    pub fn ensure_open(&self) -> Result<()> {
        match self.state() {
            SegmentState::Open => Ok(()),
            _ => Err(StoreError::NotOpen(self.segment_number)),
        }
    }

    /// Move to `state` and drop the data region
    pub fn release(&self, state: SegmentState) {
        *self.state.lock() = state;
        self.data.write().take();
    }

    /// Force the data region to stable storage (file mappings only)
    pub fn sync(&self) -> Result<()> {
        if let Some(region) = self.data.read().as_ref() {
            region.flush()?;
        }
        Ok(())
    }

    /// Copy the whole data region into `out`
    pub fn write_data_to(&self, out: &mut impl Write) -> Result<()> {
        let data = self.data.read();
        let region = data
            .as_ref()
            .ok_or(StoreError::DataNotMapped(self.segment_number))?;
        out.write_all(region.as_slice())?;
        Ok(())
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Offset the index yields for `key` under `constraint`, and whether it
    /// came straight from the index rather than through an offset list
    fn locate(
        &self,
        key: &DhtKey,
        constraint: &VersionConstraint,
        verifier: Option<&ValidityVerifier<'_>>,
    ) -> Result<Option<(u32, bool)>> {
        match self.index.get(key) {
            None => Ok(None),
            Some(IndexEntry::Offset(offset)) => Ok(Some((offset, true))),
            Some(IndexEntry::List(index)) => {
                let lists = self.offset_lists.read();
                let offset = lists.get_offset_list(index)?.offset(constraint, verifier);
                Ok(offset.map(|o| (o, false)))
            }
        }
    }

    /// The raw index entry for `key`, without any resolution
    pub fn raw_offset(&self, key: &DhtKey) -> Option<IndexEntry> {
        self.index.get(key)
    }

    /// Single offset `key` resolves to under `constraint`, without
    /// returning the record.
    ///
    /// Direct offsets are double-checked against the record header when the
    /// data region is mapped.
    pub fn resolved_offset(
        &self,
        key: &DhtKey,
        constraint: &VersionConstraint,
    ) -> Result<Option<u32>> {
        let data = self.data.read();
        let located = self.locate(key, constraint, None)?;
        Ok(match (located, data.as_ref()) {
            (None, _) => None,
            (Some((offset, true)), Some(region)) => {
                match RecordHeader::read_at(region.as_slice(), offset) {
                    Some(h) if constraint.rejects_direct(h.version, h.creation_time) => None,
                    _ => Some(offset),
                }
            }
            (Some((offset, _)), _) => Some(offset),
        })
    }

    /// Resolve `key` and return the slice of its record `options` asks for
    pub fn retrieve(&self, key: &DhtKey, options: &RetrievalOptions) -> Result<Retrieval> {
        self.ensure_open()?;
        let data = self.data.read();
        let region = data
            .as_ref()
            .ok_or(StoreError::DataNotMapped(self.segment_number))?;
        let bytes = region.as_slice();

        let verifier = options
            .verify_storage_state
            .map(|state| ValidityVerifier::new(bytes, state));
        let constraint = &options.version_constraint;
        let (offset, direct) = match self.locate(key, constraint, verifier.as_ref())? {
            Some(found) => found,
            None => {
                trace!("Segment {}: {} not found", self.segment_number, key);
                return Ok(Retrieval::NotFound);
            }
        };

        let header = match RecordHeader::read_at(bytes, offset) {
            Some(header) => header,
            None => return Ok(Retrieval::Corrupt),
        };
        let start = offset as usize + KEY_BYTES;
        let full_end = start + header.stored_length as usize;
        if full_end > bytes.len() {
            return Ok(Retrieval::Corrupt);
        }

        if direct && constraint.rejects_direct(header.version, header.creation_time) {
            trace!(
                "Segment {}: {} at {} has version {}, outside constraint",
                self.segment_number,
                key,
                offset,
                header.version
            );
            return Ok(Retrieval::NotFound);
        }
        if header.is_invalidated() && !options.return_invalidations {
            return Ok(Retrieval::NotFound);
        }

        let end = if options.retrieval_type.includes_value() || header.is_segmented() {
            full_end
        } else {
            start + header.metadata_length()
        };
        // Read-only mappings share their bytes; writable regions allocate a
        // copy of the slice here, under the data read lock
        let view = RecordView::new(offset, header, region.slice(start..end));
        if options.verify_checksums
            && options.retrieval_type.includes_value()
            && !view.checksum_matches()
        {
            return Ok(Retrieval::Corrupt);
        }
        trace!("Segment {}: {} resolved to {}", self.segment_number, key, offset);
        Ok(Retrieval::Found(view))
    }

    /// Whether a record satisfying `constraint` exists.
    ///
    /// Without a data region the answer comes from the index structures
    /// alone; direct offsets can then only be checked for the unconstrained
    /// greatest version.
    pub fn exists(&self, key: &DhtKey, constraint: &VersionConstraint) -> Result<bool> {
        self.ensure_open()?;
        if self.data.read().is_some() {
            let options =
                RetrievalOptions::new(RetrievalType::Existence).version_constraint(*constraint);
            return Ok(self.retrieve(key, &options)?.is_found());
        }

        match self.locate(key, constraint, None)? {
            None => Ok(false),
            Some((offset, false)) => Ok(!self.is_invalidated(offset)),
            Some((offset, true)) if constraint.is_greatest() => Ok(!self.is_invalidated(offset)),
            Some(_) => Err(StoreError::DataNotMapped(self.segment_number)),
        }
    }

    fn is_invalidated(&self, offset: u32) -> bool {
        self.invalidated
            .read()
            .as_ref()
            .map_or(false, |set| set.contains(&offset))
    }

    /// Stored length of the record `key` resolves to, preferring the
    /// length index over the data region
    pub fn stored_length(
        &self,
        key: &DhtKey,
        constraint: &VersionConstraint,
    ) -> Result<Option<u32>> {
        self.ensure_open()?;
        let offset = match self.resolved_offset(key, constraint)? {
            Some(offset) => offset,
            None => return Ok(None),
        };
        if let Some(length) = self.lengths.as_ref().and_then(|l| l.read().get(offset)) {
            return Ok(Some(length));
        }
        let data = self.data.read();
        let region = data
            .as_ref()
            .ok_or(StoreError::DataNotMapped(self.segment_number))?;
        Ok(RecordHeader::read_at(region.as_slice(), offset).map(|h| h.stored_length))
    }

    /// Full record at `offset`, bypassing the index
    pub fn retrieve_for_debug(&self, offset: u32) -> Result<Retrieval> {
        self.ensure_open()?;
        let data = self.data.read();
        let region = data
            .as_ref()
            .ok_or(StoreError::DataNotMapped(self.segment_number))?;
        let header = match RecordHeader::read_at(region.as_slice(), offset) {
            Some(header) => header,
            None => return Ok(Retrieval::Corrupt),
        };
        let start = offset as usize + KEY_BYTES;
        let end = start + header.stored_length as usize;
        if end > region.len() {
            return Ok(Retrieval::Corrupt);
        }
        Ok(Retrieval::Found(RecordView::new(
            offset,
            header,
            region.slice(start..end),
        )))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append `value` for `key` and publish it in the index
    pub fn put(&self, key: DhtKey, value: &StoredValue) -> Result<PutOutcome> {
        self.ensure_open()?;
        let writer = self
            .writer
            .as_ref()
            .ok_or(StoreError::ReadOnly(self.segment_number))?;
        let mut next_free = writer.lock();

        if !value.segmented && value.payload().len() > self.max_value_size as usize {
            return Err(StoreError::ValueTooLarge {
                size: value.payload().len(),
                limit: self.max_value_size,
            });
        }

        // Step 1: versions only grow within a segment
        if let Some(latest) = self.latest_version(&key)? {
            if value.version() <= latest {
                return Ok(PutOutcome::InvalidVersion);
            }
        }

        // Step 2: the record must fit in what is left of the region
        let offset = *next_free;
        let length = value.record_length();
        let end = offset as u64 + length as u64;
        if end > u64::from(self.data_segment_size) {
            return Ok(PutOutcome::SegmentFull);
        }

        // Step 3: append the record
        let creation_time = value
            .creation_time
            .unwrap_or_else(|| self.time_source.absolute_time_millis());
        let header = value.header(creation_time);
        {
            let mut data = self.data.write();
            let region = data
                .as_mut()
                .ok_or(StoreError::DataNotMapped(self.segment_number))?;
            let buf = region
                .as_mut_slice()
                .ok_or(StoreError::ReadOnly(self.segment_number))?;
            value.encode_into(&key, &header, &mut buf[offset as usize..end as usize]);
            if self.sync_on_put {
                region.flush_range(offset as usize, length)?;
            }
        }
        *next_free = end as u32;

        // Step 4: publish
        self.note_length(offset, header.stored_length);
        self.link_record(key, offset, &header)?;
        trace!(
            "Segment {}: stored {} v{} at {}",
            self.segment_number,
            key,
            header.version,
            offset
        );
        Ok(PutOutcome::Stored { offset })
    }

    /// Greatest version of `key` in this segment, checking that the index
    /// really points at records of `key`
    fn latest_version(&self, key: &DhtKey) -> Result<Option<i64>> {
        let entry = match self.index.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let data = self.data.read();
        let bytes = data
            .as_ref()
            .map(DataRegion::as_slice)
            .ok_or(StoreError::DataNotMapped(self.segment_number))?;

        match entry {
            IndexEntry::Offset(offset) => {
                check_key_at(bytes, offset, key)?;
                let header = RecordHeader::read_at(bytes, offset)
                    .ok_or_else(|| unreadable_record(offset))?;
                Ok(Some(header.version))
            }
            IndexEntry::List(index) => {
                let lists = self.offset_lists.read();
                let list = lists.get_offset_list(index)?;
                if let Some(first) = list.first_offset() {
                    check_key_at(bytes, first, key)?;
                }
                Ok(list.latest_version())
            }
        }
    }

    /// Make the record at `offset` reachable through the index.
    ///
    /// Single-version namespaces index a key's first record directly; a
    /// second record turns the entry into a two-element offset list.
    fn link_record(&self, key: DhtKey, offset: u32, header: &RecordHeader) -> Result<()> {
        let entry = OffsetListEntry {
            version: header.version,
            creation_time: header.creation_time,
            offset,
        };

        match self.index.get(&key) {
            None => match self.version_mode {
                NamespaceVersionMode::SingleVersion => self.index.put(key, IndexEntry::Offset(offset)),
                NamespaceVersionMode::MultiVersion => {
                    let list = self
                        .offset_lists
                        .write()
                        .new_list(OffsetList::from_entries(vec![entry]));
                    self.index.put(key, IndexEntry::List(list))
                }
            },
            Some(IndexEntry::Offset(prior)) => {
                let prior = self.list_entry_at(prior)?;
                let list = self
                    .offset_lists
                    .write()
                    .new_list(OffsetList::from_entries(vec![prior, entry]));
                self.index.put(key, IndexEntry::List(list))
            }
            Some(IndexEntry::List(index)) => self.offset_lists.write().add_to_list(index, entry),
        }
    }

    fn list_entry_at(&self, offset: u32) -> Result<OffsetListEntry> {
        let data = self.data.read();
        let header = data
            .as_ref()
            .and_then(|region| RecordHeader::read_at(region.as_slice(), offset))
            .ok_or_else(|| unreadable_record(offset))?;
        Ok(OffsetListEntry {
            version: header.version,
            creation_time: header.creation_time,
            offset,
        })
    }

    /// Rebuild every index structure from a scan of the data region
    pub fn reindex(&self, scan: &RecordScan) -> Result<()> {
        for record in &scan.records {
            self.link_record(record.key, record.offset, &record.header)?;
            if record.header.is_invalidated() {
                if let Some(set) = self.invalidated.write().as_mut() {
                    set.insert(record.offset);
                }
            }
            self.note_length(record.offset, record.header.stored_length);
        }
        Ok(())
    }

    /// Flag the record `key` resolves to as invalidated.
    ///
    /// Returns `false` when nothing matches or the record already was.
    pub fn invalidate(&self, key: &DhtKey, constraint: &VersionConstraint) -> Result<bool> {
        self.ensure_open()?;
        let writer = self
            .writer
            .as_ref()
            .ok_or(StoreError::ReadOnly(self.segment_number))?;
        let _next_free = writer.lock();

        let offset = match self.resolved_offset(key, constraint)? {
            Some(offset) => offset,
            None => return Ok(false),
        };
        {
            let mut data = self.data.write();
            let region = data
                .as_mut()
                .ok_or(StoreError::DataNotMapped(self.segment_number))?;
            let buf = region
                .as_mut_slice()
                .ok_or(StoreError::ReadOnly(self.segment_number))?;
            match RecordHeader::read_at(buf, offset) {
                Some(header) if !header.is_invalidated() => {}
                _ => return Ok(false),
            }
            mark_invalidated(buf, offset);
            if self.sync_on_put {
                region.flush_range(offset as usize, KEY_BYTES + FIXED_HEADER_BYTES)?;
            }
        }

        if let Some(set) = self.invalidated.write().as_mut() {
            set.insert(offset);
        }
        debug!(
            "Segment {}: invalidated {} at {}",
            self.segment_number, key, offset
        );
        Ok(true)
    }

    /// Record the stored length of a freshly appended record
    fn note_length(&self, offset: u32, stored_length: u32) {
        if let Some(lengths) = &self.lengths {
            lengths.write().insert(offset, stored_length);
        }
    }

    // =========================================================================
    // Metadata & Diagnostics
    // =========================================================================

    /// Serialize the index structures in this segment's storage format
    pub fn metadata_block(&self) -> Vec<u8> {
        let invalidated = self.invalidated.read();
        let none = BTreeSet::new();
        let lengths = self.lengths.as_ref().map(|l| l.read());
        let image = MetadataImage {
            index: self.index.to_bytes(),
            offset_lists: self.offset_lists.read().to_bytes(),
            invalidated: (*invalidated).as_ref().unwrap_or(&none),
            lengths: lengths.as_deref(),
        };
        metadata::encode(self.format, &image)
    }

    pub fn stats(&self) -> SegmentStats {
        let data_region = self.data.read().as_ref().map(DataRegion::kind);
        let next_free = self.writer.as_ref().map(|w| *w.lock());
        let offset_lists = self.offset_lists.read().len();
        let invalidated = self.invalidated.read().as_ref().map(BTreeSet::len);
        let indexed_lengths = self.lengths.as_ref().map(|l| l.read().len());

        SegmentStats {
            segment_number: self.segment_number,
            state: self.state(),
            storage_format: self.format.id(),
            data_segment_size: self.data_segment_size,
            data_region,
            next_free,
            keys: self.index.len(),
            index_capacity: self.index.capacity(),
            rehash_count: self.index.rehash_count(),
            offset_lists,
            invalidated,
            indexed_lengths,
            creation_millis: self.creation_millis,
        }
    }

    /// Log a summary and every offset list
    pub fn display_for_debug(&self) {
        let stats = self.stats();
        debug!(
            "Segment {} [{:?}] format={} keys={} lists={} capacity={} rehashes={}",
            stats.segment_number,
            stats.state,
            stats.storage_format,
            stats.keys,
            stats.offset_lists,
            stats.index_capacity,
            stats.rehash_count
        );
        self.offset_lists.read().display_for_debug();
    }
}

fn check_key_at(bytes: &[u8], offset: u32, key: &DhtKey) -> Result<()> {
    match DhtKey::from_bytes(bytes.get(offset as usize..).unwrap_or(&[])) {
        Some(found) if found == *key => Ok(()),
        found => Err(StoreError::Format(format!(
            "index maps {} to offset {} holding {:?}",
            key, offset, found
        ))),
    }
}

fn unreadable_record(offset: u32) -> StoreError {
    StoreError::Format(format!("indexed record at offset {} is unreadable", offset))
}
