//! RAM Segment
//!
//! Memory-resident segment that is written to a file exactly once, by
//! `persist`. The result is a regular segment file that
//! [`FileSegment`](super::FileSegment) can reopen.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::config::NamespaceOptions;
use crate::error::{Result, StoreError};
use crate::key::DhtKey;
use crate::metadata::SegmentMetadata;
use crate::record::StoredValue;
use crate::retrieval::VersionConstraint;
use crate::time::TimeSource;

use super::common::SegmentCore;
use super::format::{check_data_segment_size, segment_path, SegmentHeader, DATA_OFFSET};
use super::region::DataRegion;
use super::{delegate_to_core, PutOutcome, Segment, SegmentState, WritableSegment};

/// Segment whose data region lives in memory until persisted
pub struct RamSegment {
    core: SegmentCore,

    /// Namespace directory the segment is persisted into
    ns_dir: PathBuf,
}

impl RamSegment {
    /// Create an empty segment.
    ///
    /// The data region is an anonymous mapping of `data_segment_size`
    /// bytes; if the mapping cannot be made it is allocated on the heap.
    pub fn create(
        ns_dir: impl AsRef<Path>,
        segment_number: u32,
        data_segment_size: u32,
        options: &NamespaceOptions,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        options.validate()?;
        check_data_segment_size(data_segment_size)?;

        // Step 1: allocate the data region
        let mut region = match MmapMut::map_anon(data_segment_size as usize) {
            Ok(map) => DataRegion::Anonymous(map),
            Err(e) => {
                warn!(
                    "Segment {}: anonymous mapping of {} bytes failed ({}), using heap",
                    segment_number, data_segment_size, e
                );
                DataRegion::Heap(vec![0u8; data_segment_size as usize])
            }
        };

        // Step 2: stamp the segment header
        if let Some(buf) = region.as_mut_slice() {
            SegmentHeader::new(segment_number, data_segment_size).write(buf);
        }

        // Step 3: empty index structures, ready for appends
        let creation_millis = time_source.absolute_time_millis();
        let core = SegmentCore::new(
            segment_number,
            data_segment_size,
            options,
            SegmentMetadata::empty(options.ram_index)?,
            time_source,
            creation_millis,
        )?
        .with_data(region)
        .writable(DATA_OFFSET, false);

        debug!(
            "Created RAM segment {} ({} bytes, format {})",
            segment_number,
            data_segment_size,
            core.format().id()
        );
        Ok(Self {
            core,
            ns_dir: ns_dir.as_ref().to_path_buf(),
        })
    }

    /// Path `persist` writes to
    pub fn path(&self) -> PathBuf {
        segment_path(&self.ns_dir, self.core.segment_number())
    }

    /// RAM segments are never compacted in place
    pub fn compact(&self) -> Result<()> {
        Err(StoreError::Unsupported(format!(
            "compaction of RAM segment {}",
            self.core.segment_number()
        )))
    }
}

impl Segment for RamSegment {
    delegate_to_core!();

    /// Write the data region and metadata block to `<ns_dir>/<segment_number>`
    fn persist(&self) -> Result<()> {
        self.core.ensure_open()?;
        fs::create_dir_all(&self.ns_dir)?;
        let path = self.path();

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => StoreError::SegmentExists(path.clone()),
                _ => StoreError::Io(e),
            })?;

        let metadata = self.core.metadata_block();
        let mut writer = BufWriter::new(file);
        self.core.write_data_to(&mut writer)?;
        writer.write_all(&metadata)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        self.core.release(SegmentState::Persisted);
        debug!(
            "Persisted RAM segment {} to {} ({} metadata bytes)",
            self.core.segment_number(),
            path.display(),
            metadata.len()
        );
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.core.sync()
    }

    fn close(&self) -> Result<()> {
        self.core.release(SegmentState::Closed);
        Ok(())
    }
}

impl WritableSegment for RamSegment {
    fn put(&self, key: DhtKey, value: &StoredValue) -> Result<PutOutcome> {
        self.core.put(key, value)
    }

    fn invalidate(&self, key: &DhtKey, constraint: &VersionConstraint) -> Result<bool> {
        self.core.invalidate(key, constraint)
    }
}
