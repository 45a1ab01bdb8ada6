//! Bounded cuckoo table from keys to index tokens
//!
//! ## Serialized Form (little-endian)
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┐
//! │ total (4)    │ sub-tables(4)│ per bucket(4)│ limit (4)    │
//! ├──────────────┴──────────────┴──────────────┴──────────────┤
//! │ slot: msl (8) | lsl (8) | value (4)   ... total times     │
//! └───────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashSet, VecDeque};

use crate::error::{Result, StoreError};
use crate::key::DhtKey;

use super::{CuckooConfig, IndexEntry, TableFull, NO_SUCH_VALUE};

const HEADER_BYTES: usize = 16;
const SLOT_BYTES: usize = 20;

/// One step of a displacement search: a slot and the step it came from
struct PathNode {
    slot: usize,
    parent: Option<usize>,
}

/// Cuckoo hash table from [`DhtKey`] to [`IndexEntry`]
#[derive(Debug, Clone)]
pub struct KeyCuckoo {
    config: CuckooConfig,
    bucket_mask: u64,
    keys: Vec<DhtKey>,
    values: Vec<i32>,
    len: usize,
}

impl KeyCuckoo {
    /// Create an empty table
    pub fn new(config: CuckooConfig) -> Result<Self> {
        config.validate()?;
        let slots = config.total_entries as usize;
        Ok(Self {
            config,
            bucket_mask: u64::from(config.buckets_per_sub_table()) - 1,
            keys: vec![DhtKey::default(); slots],
            values: vec![NO_SUCH_VALUE; slots],
            len: 0,
        })
    }

    pub fn config(&self) -> &CuckooConfig {
        &self.config
    }

    /// Number of keys stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Entry for `key`, probing one bucket per sub-table
    pub fn get(&self, key: &DhtKey) -> Option<IndexEntry> {
        self.find_slot(key)
            .and_then(|slot| IndexEntry::from_raw(self.values[slot]))
    }

    fn find_slot(&self, key: &DhtKey) -> Option<usize> {
        (0..self.config.num_sub_tables as usize).find_map(|sub_table| {
            self.bucket_slots(key, sub_table)
                .find(|&slot| self.values[slot] != NO_SUCH_VALUE && self.keys[slot] == *key)
        })
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Insert or update the entry for `key`.
    ///
    /// Updates of an existing key never fail. On [`TableFull`] the table is
    /// left exactly as it was.
    pub fn put(&mut self, key: DhtKey, entry: IndexEntry) -> std::result::Result<(), TableFull> {
        let raw = entry.to_raw();
        if let Some(slot) = self.find_slot(&key) {
            self.values[slot] = raw;
            return Ok(());
        }

        for sub_table in 0..self.config.num_sub_tables as usize {
            if let Some(slot) = self.bucket_slots(&key, sub_table).find(|&s| self.is_free(s)) {
                self.store(slot, key, raw);
                return Ok(());
            }
        }

        match self.find_displacement_path(&key) {
            Some((nodes, free_slot)) => {
                self.apply_path(&nodes, free_slot, key, raw);
                Ok(())
            }
            None => Err(TableFull {
                entries: self.len,
                capacity: self.capacity(),
            }),
        }
    }

    /// Breadth-first search for a chain of moves ending in a free slot.
    ///
    /// Nothing is moved here; the returned nodes describe the chain and the
    /// free slot terminates it.
    fn find_displacement_path(&self, key: &DhtKey) -> Option<(Vec<PathNode>, usize)> {
        let limit = self.config.cuckoo_limit as usize;
        let mut nodes: Vec<PathNode> = Vec::new();
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();

        for sub_table in 0..self.config.num_sub_tables as usize {
            for slot in self.bucket_slots(key, sub_table) {
                if visited.insert(slot) {
                    queue.push_back(nodes.len());
                    nodes.push(PathNode { slot, parent: None });
                }
            }
        }

        let mut explored = 0;
        while let Some(node_idx) = queue.pop_front() {
            if explored >= limit {
                return None;
            }
            explored += 1;

            let slot = nodes[node_idx].slot;
            let resident = self.keys[slot];
            let home = self.sub_table_of(slot);

            for sub_table in (0..self.config.num_sub_tables as usize).filter(|&t| t != home) {
                for candidate in self.bucket_slots(&resident, sub_table) {
                    if self.is_free(candidate) {
                        return Some((trace_path(nodes, node_idx), candidate));
                    }
                    if visited.insert(candidate) {
                        queue.push_back(nodes.len());
                        nodes.push(PathNode {
                            slot: candidate,
                            parent: Some(node_idx),
                        });
                    }
                }
            }
        }
        None
    }

    /// Shift residents along the path (tail first) and place the new key
    fn apply_path(&mut self, path: &[PathNode], free_slot: usize, key: DhtKey, raw: i32) {
        let mut target = free_slot;
        for node in path {
            self.keys[target] = self.keys[node.slot];
            self.values[target] = self.values[node.slot];
            target = node.slot;
        }
        self.keys[target] = key;
        self.values[target] = raw;
        self.len += 1;
    }

    fn store(&mut self, slot: usize, key: DhtKey, raw: i32) {
        self.keys[slot] = key;
        self.values[slot] = raw;
        self.len += 1;
    }

    /// Copy every mapping plus `key -> entry` into a larger table.
    ///
    /// Capacity doubles until everything fits; `self` is untouched.
    pub fn rehash_and_add(&self, key: DhtKey, entry: IndexEntry) -> Result<Self> {
        let mut config = self.config.doubled();
        'grow: loop {
            let mut table = Self::new(config)?;
            for (k, e) in self.iter().chain(std::iter::once((key, entry))) {
                if table.put(k, e).is_err() {
                    config = config.doubled();
                    continue 'grow;
                }
            }
            return Ok(table);
        }
    }

    /// All mappings, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (DhtKey, IndexEntry)> + '_ {
        self.keys
            .iter()
            .zip(self.values.iter())
            .filter_map(|(key, &raw)| IndexEntry::from_raw(raw).map(|entry| (*key, entry)))
    }

    // =========================================================================
    // Slot Arithmetic
    // =========================================================================

    fn bucket_slots(&self, key: &DhtKey, sub_table: usize) -> std::ops::Range<usize> {
        let per_bucket = self.config.entries_per_bucket as usize;
        let buckets = self.config.buckets_per_sub_table() as usize;
        let bucket = (key.hash_with_seed(sub_table as u64 + 1) & self.bucket_mask) as usize;
        let start = (sub_table * buckets + bucket) * per_bucket;
        start..start + per_bucket
    }

    fn sub_table_of(&self, slot: usize) -> usize {
        let per_sub_table =
            (self.config.buckets_per_sub_table() * self.config.entries_per_bucket) as usize;
        slot / per_sub_table
    }

    fn is_free(&self, slot: usize) -> bool {
        self.values[slot] == NO_SUCH_VALUE
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Size of [`to_bytes`](Self::to_bytes) output
    pub fn persisted_size_bytes(&self) -> usize {
        HEADER_BYTES + self.capacity() * SLOT_BYTES
    }

    /// Serialize the full table, empty slots included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.persisted_size_bytes());
        out.extend_from_slice(&self.config.total_entries.to_le_bytes());
        out.extend_from_slice(&self.config.num_sub_tables.to_le_bytes());
        out.extend_from_slice(&self.config.entries_per_bucket.to_le_bytes());
        out.extend_from_slice(&self.config.cuckoo_limit.to_le_bytes());
        for (key, value) in self.keys.iter().zip(self.values.iter()) {
            out.extend_from_slice(&key.msl().to_le_bytes());
            out.extend_from_slice(&key.lsl().to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Rebuild a table from [`to_bytes`](Self::to_bytes) output
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_BYTES {
            return Err(StoreError::Format(format!(
                "key index truncated: {} bytes",
                buf.len()
            )));
        }
        let field = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let config = CuckooConfig::new(field(0), field(4), field(8), field(12));
        let expected = HEADER_BYTES + config.total_entries as usize * SLOT_BYTES;
        if buf.len() < expected {
            return Err(StoreError::Format(format!(
                "key index truncated: expected {} bytes, got {}",
                expected,
                buf.len()
            )));
        }
        let mut table = Self::new(config)
            .map_err(|e| StoreError::Format(format!("bad key index geometry: {}", e)))?;

        for (slot, chunk) in buf[HEADER_BYTES..expected].chunks_exact(SLOT_BYTES).enumerate() {
            let value = i32::from_le_bytes([chunk[16], chunk[17], chunk[18], chunk[19]]);
            table.keys[slot] = DhtKey::new(le_u64(&chunk[0..8]), le_u64(&chunk[8..16]));
            table.values[slot] = value;
            if value != NO_SUCH_VALUE {
                table.len += 1;
            }
        }
        Ok(table)
    }
}

/// Walk parent links from `tail` back to a root, tail first
fn trace_path(mut nodes: Vec<PathNode>, tail: usize) -> Vec<PathNode> {
    let mut path = Vec::new();
    let mut current = Some(tail);
    while let Some(idx) = current {
        let node = std::mem::replace(&mut nodes[idx], PathNode { slot: 0, parent: None });
        current = node.parent;
        path.push(node);
    }
    path
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
