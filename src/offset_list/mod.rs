//! Offset List Module
//!
//! A key written more than once within a segment (or any key of a
//! multi-version namespace) is indexed through an offset list instead of
//! a direct offset:
//!
//! ```text
//!  key index                 offset list store
//! ┌──────────┬──────┐       ┌───┬──────────────────────────────────┐
//! │ key A    │  312 │──┐    │ 1 │ (v1, t1, 64) (v2, t2, 901)       │
//! │ key B    │   -1 │──┼──► │ 2 │ (v7, t7, 1480)                   │
//! └──────────┴──────┘  │    └───┴──────────────────────────────────┘
//!                      └──► record at offset 312
//! ```
//!
//! Every entry of one list refers to a record with the same key. Entries
//! carry version and creation time so a list can be resolved against a
//! version constraint without reading the data region.

mod list;
mod store;

use crate::record::storage_state_at;

pub use list::{OffsetList, OffsetListEntry};
pub use store::OffsetListStore;

/// Rejects offset-list candidates whose record is not in the required
/// storage state.
///
/// Used when a retrieval must be consistent with a checkpointed snapshot
/// of the store.
#[derive(Debug, Clone, Copy)]
pub struct ValidityVerifier<'a> {
    data: &'a [u8],
    required_state: u8,
}

impl<'a> ValidityVerifier<'a> {
    pub fn new(data: &'a [u8], required_state: u8) -> Self {
        Self {
            data,
            required_state,
        }
    }

    /// Whether the record at `offset` carries the required storage state
    pub fn is_valid(&self, offset: u32) -> bool {
        storage_state_at(self.data, offset) == Some(self.required_state)
    }
}
