//! File Segment
//!
//! Segment backed by a memory-mapped file named by its segment number.
//!
//! ## Access Modes
//! ```text
//! ┌───────────────┬──────────┬──────────────┬──────────────────────────┐
//! │ Mode          │ Writable │ Data mapped  │ Index from               │
//! ├───────────────┼──────────┼──────────────┼──────────────────────────┤
//! │ Creation      │ yes      │ read/write   │ empty (file must be new) │
//! │ Update        │ yes      │ read/write   │ metadata, else scan      │
//! │ ReadOnly      │ no       │ read         │ metadata                 │
//! │ ReadIndexOnly │ no       │ no           │ metadata                 │
//! │ Repair        │ yes      │ read/write   │ scan of the data region  │
//! └───────────────┴──────────┴──────────────┴──────────────────────────┘
//! ```
//!
//! Index-only access needs offset lists (which carry versions) and an
//! invalidated-offset element, so single-version namespaces and legacy
//! formats are opened read-only instead.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{NamespaceOptions, NamespaceVersionMode};
use crate::error::{Result, StoreError};
use crate::key::DhtKey;
use crate::metadata::{MetadataBlock, SegmentMetadata};
use crate::record::StoredValue;
use crate::retrieval::VersionConstraint;
use crate::time::TimeSource;

use super::common::SegmentCore;
use super::format::{
    check_data_segment_size, scan_records, segment_path, SegmentHeader, DATA_OFFSET,
    SEGMENT_HEADER_BYTES,
};
use super::region::DataRegion;
use super::{delegate_to_core, PutOutcome, Segment, SegmentState, WritableSegment};

/// How a segment file was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Creation,
    Update,
    ReadOnly,
    ReadIndexOnly,
    Repair,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Creation | Self::Update | Self::Repair)
    }
}

/// Whether each append is flushed to the file before `put` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    NoSync,
    Sync,
}

/// Whether a read-only mapping is populated up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrereadMode {
    #[default]
    NoPreread,
    Preread,
}

/// Segment stored in `<ns_dir>/<segment_number>`
pub struct FileSegment {
    core: SegmentCore,
    path: PathBuf,
    access: AccessMode,
    data_segment_size: u32,

    /// Open while the segment is; released by persist and close
    file: Mutex<Option<File>>,
}

impl FileSegment {
    // =========================================================================
    // Opening
    // =========================================================================

    /// Create a new segment file; fails if one already exists
    pub fn create(
        ns_dir: impl AsRef<Path>,
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        sync_mode: SyncMode,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        options.validate()?;
        check_data_segment_size(data_segment_size)?;
        fs::create_dir_all(ns_dir.as_ref())?;
        let path = segment_path(ns_dir.as_ref(), segment_number);

        // Step 1: claim the file
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => StoreError::SegmentExists(path.clone()),
                _ => StoreError::Io(e),
            })?;
        file.set_len(u64::from(data_segment_size))?;

        // Step 2: map the data region and stamp the header
        let mut map = map_data_mut(&file, data_segment_size)?;
        SegmentHeader::new(segment_number, data_segment_size).write(&mut map);

        // Step 3: empty index structures, ready for appends
        let creation_millis = file_creation_millis(&file, segment_number, time_source.as_ref());
        let core = SegmentCore::new(
            segment_number,
            data_segment_size,
            options,
            SegmentMetadata::empty(options.file_index)?,
            time_source,
            creation_millis,
        )?
        .with_data(DataRegion::Mapped(map))
        .writable(DATA_OFFSET, sync_mode == SyncMode::Sync);

        debug!("Created segment {} at {}", segment_number, path.display());
        Ok(Self::assemble(core, path, AccessMode::Creation, data_segment_size, file))
    }

    /// Reopen a segment for further appends and invalidations.
    ///
    /// The index comes from the metadata block when the segment was
    /// persisted before, otherwise from a scan of the data region. A loaded
    /// block is cut off the file straight away: until the next `persist`
    /// writes a fresh one, the scan is the only source that covers appends.
    pub fn open_for_data_update(
        ns_dir: impl AsRef<Path>,
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        sync_mode: SyncMode,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        options.validate()?;
        check_data_segment_size(data_segment_size)?;
        let path = segment_path(ns_dir.as_ref(), segment_number);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        check_file_len(&file, &path, data_segment_size)?;

        let map = map_data_mut(&file, data_segment_size)?;
        SegmentHeader::read(&map)?.check(segment_number, data_segment_size)?;
        let scan = scan_records(&map);
        if scan.stopped_at_damage {
            warn!(
                "Segment {}: unreadable record at {}, appending after it would overwrite it",
                segment_number, scan.end
            );
        }
        let metadata = read_metadata(&file, data_segment_size)?;

        let creation_millis = file_creation_millis(&file, segment_number, time_source.as_ref());
        let structures = if metadata.is_empty() {
            SegmentMetadata::empty(options.file_index)?
        } else {
            let loaded = MetadataBlock::parse(&metadata, options.format()?)?.load()?;
            file.set_len(u64::from(data_segment_size))?;
            file.sync_all()?;
            loaded
        };
        let core = SegmentCore::new(
            segment_number,
            data_segment_size,
            options,
            structures,
            time_source,
            creation_millis,
        )?
        .with_data(DataRegion::Mapped(map))
        .writable(scan.end, sync_mode == SyncMode::Sync);
        if metadata.is_empty() {
            core.reindex(&scan)?;
        }

        debug!(
            "Opened segment {} for update: {} records, next free {}",
            segment_number,
            scan.records.len(),
            scan.end
        );
        Ok(Self::assemble(core, path, AccessMode::Update, data_segment_size, file))
    }

    /// Open a persisted segment for serving reads
    pub fn open_read_only(
        ns_dir: impl AsRef<Path>,
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        preread: PrereadMode,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        options.validate()?;
        check_data_segment_size(data_segment_size)?;
        let path = segment_path(ns_dir.as_ref(), segment_number);
        let file = File::open(&path)?;
        check_file_len(&file, &path, data_segment_size)?;

        let map = map_data_read(&file, data_segment_size, preread)?;
        SegmentHeader::read(&map)?.check(segment_number, data_segment_size)?;
        let metadata = load_metadata(&file, segment_number, data_segment_size, options)?;

        let creation_millis = file_creation_millis(&file, segment_number, time_source.as_ref());
        let core = SegmentCore::new(
            segment_number,
            data_segment_size,
            options,
            metadata,
            time_source,
            creation_millis,
        )?
        .with_data(DataRegion::Shared(Bytes::from_owner(map)));

        debug!("Opened segment {} read-only", segment_number);
        Ok(Self::assemble(core, path, AccessMode::ReadOnly, data_segment_size, file))
    }

    /// Open only the metadata block of a persisted segment.
    ///
    /// Falls back to [`open_read_only`](Self::open_read_only) when the
    /// namespace cannot answer lookups from index structures alone.
    pub fn open_read_index_only(
        ns_dir: impl AsRef<Path>,
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        options.validate()?;
        check_data_segment_size(data_segment_size)?;
        let format = options.format()?;
        if options.version_mode == NamespaceVersionMode::SingleVersion || !format.is_ltv() {
            warn!(
                "Segment {}: index-only access needs a multi-version LTV namespace, opening read-only",
                segment_number
            );
            return Self::open_read_only(
                ns_dir,
                segment_number,
                data_segment_size,
                options,
                PrereadMode::NoPreread,
                time_source,
            );
        }

        let path = segment_path(ns_dir.as_ref(), segment_number);
        let mut file = File::open(&path)?;
        check_file_len(&file, &path, data_segment_size)?;

        let mut header = [0u8; SEGMENT_HEADER_BYTES];
        file.read_exact(&mut header)?;
        SegmentHeader::read(&header)?.check(segment_number, data_segment_size)?;
        let metadata = load_metadata(&file, segment_number, data_segment_size, options)?;

        let creation_millis = file_creation_millis(&file, segment_number, time_source.as_ref());
        let core = SegmentCore::new(
            segment_number,
            data_segment_size,
            options,
            metadata,
            time_source,
            creation_millis,
        )?;

        debug!("Opened segment {} index-only", segment_number);
        Ok(Self::assemble(core, path, AccessMode::ReadIndexOnly, data_segment_size, file))
    }

    /// Rebuild a segment's index by scanning its data region.
    ///
    /// The file may or may not exist. Any metadata block is discarded, and
    /// bytes after the last intact record are zeroed.
    pub fn open_for_repair(
        ns_dir: impl AsRef<Path>,
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        sync_mode: SyncMode,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        options.validate()?;
        check_data_segment_size(data_segment_size)?;
        fs::create_dir_all(ns_dir.as_ref())?;
        let path = segment_path(ns_dir.as_ref(), segment_number);

        // Step 1: open and cut the file back to its data region
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.set_len(u64::from(data_segment_size))?;
        let mut map = map_data_mut(&file, data_segment_size)?;

        // Step 2: header, written fresh if the region never had one
        if map[..SEGMENT_HEADER_BYTES].iter().all(|b| *b == 0) {
            SegmentHeader::new(segment_number, data_segment_size).write(&mut map);
        } else {
            SegmentHeader::read(&map)?.check(segment_number, data_segment_size)?;
        }

        // Step 3: walk the records and clear whatever follows them
        let scan = scan_records(&map);
        if scan.stopped_at_damage {
            warn!(
                "Segment {}: repair stopped at damaged record at {}",
                segment_number, scan.end
            );
        }
        map[scan.end as usize..].fill(0);

        // Step 4: rebuild the index structures
        let creation_millis = file_creation_millis(&file, segment_number, time_source.as_ref());
        let core = SegmentCore::new(
            segment_number,
            data_segment_size,
            options,
            SegmentMetadata::empty(options.file_index)?,
            time_source,
            creation_millis,
        )?
        .with_data(DataRegion::Mapped(map))
        .writable(scan.end, sync_mode == SyncMode::Sync);
        core.reindex(&scan)?;

        debug!(
            "Repaired segment {}: {} records, data ends at {}",
            segment_number,
            scan.records.len(),
            scan.end
        );
        Ok(Self::assemble(core, path, AccessMode::Repair, data_segment_size, file))
    }

    fn assemble(
        core: SegmentCore,
        path: PathBuf,
        access: AccessMode,
        data_segment_size: u32,
        file: File,
    ) -> Self {
        Self {
            core,
            path,
            access,
            data_segment_size,
            file: Mutex::new(Some(file)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access
    }
}

impl Segment for FileSegment {
    delegate_to_core!();

    /// Flush the data region, write a fresh metadata block after it and
    /// release the file
    fn persist(&self) -> Result<()> {
        self.core.ensure_open()?;
        if !self.access.is_writable() {
            return Err(StoreError::ReadOnly(self.core.segment_number()));
        }
        let mut slot = self.file.lock();
        let file = slot
            .as_ref()
            .ok_or(StoreError::NotOpen(self.core.segment_number()))?;

        // Step 1: data region to stable storage
        self.core.sync()?;

        // Step 2: replace any previous metadata block
        let metadata = self.core.metadata_block();
        let data_len = u64::from(self.data_segment_size);
        file.set_len(data_len)?;
        file.set_len(data_len + metadata.len() as u64)?;

        // SAFETY: the file is exclusively owned by this segment and was just
        // extended to cover the mapped range; the mapping is dropped before
        // the file is released.
        let mut map = unsafe {
            MmapOptions::new()
                .offset(data_len)
                .len(metadata.len())
                .map_mut(file)?
        };
        map.copy_from_slice(&metadata);
        map.flush()?;
        drop(map);
        file.sync_all()?;

        // Step 3: release
        *slot = None;
        self.core.release(SegmentState::Persisted);
        debug!(
            "Persisted segment {} ({} metadata bytes)",
            self.core.segment_number(),
            metadata.len()
        );
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    fn close(&self) -> Result<()> {
        self.core.release(SegmentState::Closed);
        self.file.lock().take();
        Ok(())
    }
}

impl WritableSegment for FileSegment {
    fn put(&self, key: DhtKey, value: &StoredValue) -> Result<PutOutcome> {
        self.core.put(key, value)
    }

    fn invalidate(&self, key: &DhtKey, constraint: &VersionConstraint) -> Result<bool> {
        self.core.invalidate(key, constraint)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_file_len(file: &File, path: &Path, data_segment_size: u32) -> Result<()> {
    let len = file.metadata()?.len();
    if len < u64::from(data_segment_size) {
        return Err(StoreError::Format(format!(
            "{} is {} bytes, shorter than its {} byte data region",
            path.display(),
            len,
            data_segment_size
        )));
    }
    Ok(())
}

fn map_data_mut(file: &File, data_segment_size: u32) -> Result<MmapMut> {
    // SAFETY: the segment file is owned by one segment instance at a time
    // and is at least `data_segment_size` bytes long; every access to the
    // mapping is bounds-checked against that length.
    let map = unsafe {
        MmapOptions::new()
            .len(data_segment_size as usize)
            .map_mut(file)?
    };
    Ok(map)
}

fn map_data_read(file: &File, data_segment_size: u32, preread: PrereadMode) -> Result<Mmap> {
    let mut options = MmapOptions::new();
    options.len(data_segment_size as usize);
    if preread == PrereadMode::Preread {
        options.populate();
    }
    // SAFETY: persisted segments are immutable; the file is at least
    // `data_segment_size` bytes long.
    let map = unsafe { options.map(file)? };
    Ok(map)
}

/// Bytes after the data region; empty when the segment was never persisted
fn read_metadata(file: &File, data_segment_size: u32) -> Result<Vec<u8>> {
    let mut reader = file;
    reader.seek(SeekFrom::Start(u64::from(data_segment_size)))?;
    let mut metadata = Vec::new();
    reader.read_to_end(&mut metadata)?;
    Ok(metadata)
}

fn load_metadata(
    file: &File,
    segment_number: u32,
    data_segment_size: u32,
    options: &NamespaceOptions,
) -> Result<SegmentMetadata> {
    let metadata = read_metadata(file, data_segment_size)?;
    if metadata.is_empty() {
        return Err(StoreError::Format(format!(
            "segment {} has no metadata block; it was never persisted",
            segment_number
        )));
    }
    MetadataBlock::parse(&metadata, options.format()?)?.load()
}

/// Creation time from file metadata (created, then modified), falling back
/// to the time source
fn file_creation_millis(file: &File, segment_number: u32, time_source: &dyn TimeSource) -> i64 {
    let millis = file
        .metadata()
        .ok()
        .and_then(|m| m.created().or_else(|_| m.modified()).ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64);
    match millis {
        Some(millis) => millis,
        None => {
            warn!(
                "Segment {}: file times unavailable, using time source for creation time",
                segment_number
            );
            time_source.absolute_time_millis()
        }
    }
}
