//! Retrieval model
//!
//! What a reader asks a segment for (a key plus [`RetrievalOptions`]) and
//! what it gets back ([`Retrieval`]). Missing keys, version mismatches and
//! corrupt records are all ordinary results here, not errors.

use crate::record::RecordView;

/// Which end of a version range wins when several versions match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelection {
    Least,
    Greatest,
}

/// Query-side predicate over a record's version and creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionConstraint {
    min: i64,
    max: i64,
    mode: VersionSelection,
    max_creation_time: i64,
}

impl VersionConstraint {
    /// Greatest version, no creation time bound
    pub const GREATEST: Self = Self {
        min: i64::MIN,
        max: i64::MAX,
        mode: VersionSelection::Greatest,
        max_creation_time: i64::MAX,
    };

    /// Least version, no creation time bound
    pub const LEAST: Self = Self {
        min: i64::MIN,
        max: i64::MAX,
        mode: VersionSelection::Least,
        max_creation_time: i64::MAX,
    };

    pub fn new(min: i64, max: i64, mode: VersionSelection) -> Self {
        Self {
            min,
            max,
            mode,
            max_creation_time: i64::MAX,
        }
    }

    /// Exactly `version`
    pub fn exact(version: i64) -> Self {
        Self::new(version, version, VersionSelection::Greatest)
    }

    /// Greatest version created at or before `millis`
    pub fn at_or_before(millis: i64) -> Self {
        Self::GREATEST.with_max_creation_time(millis)
    }

    pub fn with_max_creation_time(mut self, millis: i64) -> Self {
        self.max_creation_time = millis;
        self
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn mode(&self) -> VersionSelection {
        self.mode
    }

    pub fn max_creation_time(&self) -> i64 {
        self.max_creation_time
    }

    pub fn is_greatest(&self) -> bool {
        *self == Self::GREATEST
    }

    /// Version lies within `[min, max]`
    pub fn matches(&self, version: i64) -> bool {
        version >= self.min && version <= self.max
    }

    /// Version range and creation-time bound both satisfied
    pub fn accepts(&self, version: i64, creation_time: i64) -> bool {
        self.matches(version) && creation_time <= self.max_creation_time
    }

    /// Re-validation of a record reached through a direct index offset.
    ///
    /// Skips the version comparison for the unconstrained greatest case and
    /// the time comparison when no bound is set, so the common path never
    /// inspects the record.
    pub(crate) fn rejects_direct(&self, version: i64, creation_time: i64) -> bool {
        (!self.is_greatest() && !self.matches(version))
            || (self.max_creation_time < i64::MAX && self.max_creation_time < creation_time)
    }
}

impl Default for VersionConstraint {
    fn default() -> Self {
        Self::GREATEST
    }
}

/// Slice of the record a retrieval returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalType {
    #[default]
    Value,
    ValueAndMetaData,
    MetaData,
    Existence,
}

impl RetrievalType {
    /// Whether the payload is part of the returned slice
    pub fn includes_value(self) -> bool {
        matches!(self, Self::Value | Self::ValueAndMetaData)
    }
}

/// Options of a single retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrievalOptions {
    pub retrieval_type: RetrievalType,
    pub version_constraint: VersionConstraint,

    /// Return invalidated records instead of treating them as absent
    pub return_invalidations: bool,

    /// Recompute payload checksums; mismatches yield [`Retrieval::Corrupt`]
    pub verify_checksums: bool,

    /// Only accept offset-list candidates whose storage state matches
    pub verify_storage_state: Option<u8>,
}

impl RetrievalOptions {
    pub fn new(retrieval_type: RetrievalType) -> Self {
        Self {
            retrieval_type,
            ..Self::default()
        }
    }

    pub fn version_constraint(mut self, constraint: VersionConstraint) -> Self {
        self.version_constraint = constraint;
        self
    }

    pub fn return_invalidations(mut self, yes: bool) -> Self {
        self.return_invalidations = yes;
        self
    }

    pub fn verify_checksums(mut self, yes: bool) -> Self {
        self.verify_checksums = yes;
        self
    }

    pub fn verify_storage_state(mut self, state: u8) -> Self {
        self.verify_storage_state = Some(state);
        self
    }
}

/// Outcome of a retrieval
#[derive(Debug, Clone)]
pub enum Retrieval {
    Found(RecordView),
    NotFound,
    Corrupt,
}

impl Retrieval {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt)
    }

    /// The record, if one was found
    pub fn found(self) -> Option<RecordView> {
        match self {
            Self::Found(view) => Some(view),
            _ => None,
        }
    }
}
