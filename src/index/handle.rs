//! Current-version reference to a segment's key index
//!
//! Readers take a short shared lock per lookup. The single writer inserts
//! under the exclusive lock; when the table is full it drops to an
//! upgradable lock, builds the larger table while readers keep using the
//! old one, then swaps it in. Readers see either table in full, never a
//! table under construction.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::key::DhtKey;

use super::{CuckooConfig, IndexEntry, KeyCuckoo};

/// Owns the current [`KeyCuckoo`] and replaces it on overflow
#[derive(Debug)]
pub struct IndexHandle {
    table: RwLock<KeyCuckoo>,
    rehash_count: AtomicU32,
}

impl IndexHandle {
    /// Handle over a new, empty table
    pub fn new(config: CuckooConfig) -> Result<Self> {
        Ok(Self::from_table(KeyCuckoo::new(config)?))
    }

    /// Handle over an existing table (e.g. one read back from metadata)
    pub fn from_table(table: KeyCuckoo) -> Self {
        Self {
            table: RwLock::new(table),
            rehash_count: AtomicU32::new(0),
        }
    }

    pub fn get(&self, key: &DhtKey) -> Option<IndexEntry> {
        self.table.read().get(key)
    }

    /// Insert or update; grows the table if the key does not fit
    pub fn put(&self, key: DhtKey, entry: IndexEntry) -> Result<()> {
        let mut table = self.table.write();
        let full = match table.put(key, entry) {
            Ok(()) => return Ok(()),
            Err(full) => full,
        };

        let table = RwLockWriteGuard::downgrade_to_upgradable(table);
        let rebuilt = table.rehash_and_add(key, entry)?;
        tracing::info!(
            "Index rehash: {} entries, {} -> {} slots",
            full.entries + 1,
            full.capacity,
            rebuilt.capacity()
        );

        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        *table = rebuilt;
        self.rehash_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of keys indexed
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots in the current table
    pub fn capacity(&self) -> usize {
        self.table.read().capacity()
    }

    /// How many times the table has been replaced
    pub fn rehash_count(&self) -> u32 {
        self.rehash_count.load(Ordering::Relaxed)
    }

    /// Snapshot of all mappings
    pub fn entries(&self) -> Vec<(DhtKey, IndexEntry)> {
        self.table.read().iter().collect()
    }

    /// Serialized image of the current table
    pub fn to_bytes(&self) -> Vec<u8> {
        self.table.read().to_bytes()
    }
}
