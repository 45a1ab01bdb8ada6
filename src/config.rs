//! Namespace configuration for dhtstore
//!
//! Segments never decide their own layout: the namespace they belong to
//! supplies the storage format, the versioning mode and the initial index
//! geometry. The options are normally handed in by the namespace layer;
//! a copy can also be kept next to the segments as a `properties` file so
//! that repair tooling can reopen a namespace directory on its own.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::index::CuckooConfig;
use crate::metadata::StorageFormat;

/// Name of the options file kept in a namespace directory
pub const PROPERTIES_FILENAME: &str = "properties";

/// How many versions of a key a namespace keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceVersionMode {
    /// One version per key; the first write is indexed by direct offset
    SingleVersion,

    /// Any number of versions; every key is indexed through an offset list
    MultiVersion,
}

/// Options of the namespace that owns a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceOptions {
    // -------------------------------------------------------------------------
    // Storage Layout
    // -------------------------------------------------------------------------
    /// Metadata format identifier ("0" legacy, "1".."3" LTV variants)
    pub storage_format: String,

    /// Versioning mode of the namespace
    pub version_mode: NamespaceVersionMode,

    /// Largest value stored unsegmented (bytes)
    pub segment_size: u32,

    // -------------------------------------------------------------------------
    // Index Geometry
    // -------------------------------------------------------------------------
    /// Initial key index for RAM segments
    pub ram_index: CuckooConfig,

    /// Initial key index for file segments
    pub file_index: CuckooConfig,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self {
            storage_format: "3".to_string(),
            version_mode: NamespaceVersionMode::SingleVersion,
            segment_size: 1024 * 1024, // 1 MB
            ram_index: CuckooConfig::new(1024, 4, 4, 32),
            file_index: CuckooConfig::new(4096, 4, 4, 32),
        }
    }
}

impl NamespaceOptions {
    /// Create a new options builder
    pub fn builder() -> NamespaceOptionsBuilder {
        NamespaceOptionsBuilder::default()
    }

    /// Parse the configured storage format
    pub fn format(&self) -> Result<StorageFormat> {
        StorageFormat::parse(&self.storage_format)
    }

    /// Path of the options file inside a namespace directory
    pub fn properties_path(ns_dir: &Path) -> PathBuf {
        ns_dir.join(PROPERTIES_FILENAME)
    }

    /// Write these options to `{ns_dir}/properties`
    pub fn write_properties(&self, ns_dir: &Path) -> Result<()> {
        fs::create_dir_all(ns_dir)?;
        let file = File::create(Self::properties_path(ns_dir))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    /// Read options previously written with [`write_properties`](Self::write_properties)
    pub fn read_properties(ns_dir: &Path) -> Result<Self> {
        let file = File::open(Self::properties_path(ns_dir))?;
        let options: Self = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check that the options describe a usable namespace
    pub fn validate(&self) -> Result<()> {
        self.format()?;
        self.ram_index.validate()?;
        self.file_index.validate()?;
        if self.segment_size == 0 {
            return Err(StoreError::Config("segment_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for NamespaceOptions
#[derive(Default)]
pub struct NamespaceOptionsBuilder {
    options: NamespaceOptions,
}

impl NamespaceOptionsBuilder {
    /// Set the storage format identifier
    pub fn storage_format(mut self, format: impl Into<String>) -> Self {
        self.options.storage_format = format.into();
        self
    }

    /// Set the versioning mode
    pub fn version_mode(mut self, mode: NamespaceVersionMode) -> Self {
        self.options.version_mode = mode;
        self
    }

    /// Set the largest unsegmented value size (in bytes)
    pub fn segment_size(mut self, size: u32) -> Self {
        self.options.segment_size = size;
        self
    }

    /// Set the initial index geometry for RAM segments
    pub fn ram_index(mut self, config: CuckooConfig) -> Self {
        self.options.ram_index = config;
        self
    }

    /// Set the initial index geometry for file segments
    pub fn file_index(mut self, config: CuckooConfig) -> Self {
        self.options.file_index = config;
        self
    }

    pub fn build(self) -> NamespaceOptions {
        self.options
    }
}
