//! A single key's co-resident versions

use crate::retrieval::{VersionConstraint, VersionSelection};

use super::ValidityVerifier;

/// Bytes per serialized entry: version (8) + creation time (8) + offset (4)
pub(crate) const ENTRY_BYTES: usize = 20;

/// One version of a key within a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetListEntry {
    pub version: i64,
    pub creation_time: i64,
    pub offset: u32,
}

/// Offsets of every record of one key, in append order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetList {
    entries: Vec<OffsetListEntry>,
}

impl OffsetList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: Vec<OffsetListEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: OffsetListEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[OffsetListEntry] {
        &self.entries
    }

    /// Offset standing in for the whole list in same-key checks
    pub fn first_offset(&self) -> Option<u32> {
        self.entries.first().map(|e| e.offset)
    }

    /// Greatest version present
    pub fn latest_version(&self) -> Option<i64> {
        self.entries.iter().map(|e| e.version).max()
    }

    /// Select the offset satisfying `constraint`.
    ///
    /// Candidates must match the version range and creation-time bound and,
    /// when a verifier is given, pass it. Among survivors the constraint's
    /// mode picks the least or greatest version; equal versions resolve to
    /// the most recently appended entry.
    pub fn offset(
        &self,
        constraint: &VersionConstraint,
        verifier: Option<&ValidityVerifier<'_>>,
    ) -> Option<u32> {
        let candidates = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| constraint.accepts(e.version, e.creation_time))
            .filter(|(_, e)| verifier.map_or(true, |v| v.is_valid(e.offset)));

        let chosen = match constraint.mode() {
            VersionSelection::Greatest => candidates.max_by_key(|(i, e)| (e.version, *i)),
            VersionSelection::Least => candidates.min_by_key(|(i, e)| (e.version, std::cmp::Reverse(*i))),
        };
        chosen.map(|(_, e)| e.offset)
    }

    /// Log every entry
    pub fn display_for_debug(&self) {
        for (i, e) in self.entries.iter().enumerate() {
            tracing::debug!(
                "  [{}] version={} creation_time={} offset={}",
                i,
                e.version,
                e.creation_time,
                e.offset
            );
        }
    }
}

impl<'a> IntoIterator for &'a OffsetList {
    type Item = &'a OffsetListEntry;
    type IntoIter = std::slice::Iter<'a, OffsetListEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
