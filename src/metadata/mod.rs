//! Metadata Module
//!
//! The block written after a file segment's data region, from which the
//! key index, offset lists, invalidated offsets and (optionally) the length
//! index are rebuilt on reopen.
//!
//! ## Layouts
//! ```text
//! Legacy (V0):
//! ┌──────────────────┬──────────────────┬─────────────────────┐
//! │ index length (4) │ key index image  │ offset lists image  │
//! └──────────────────┴──────────────────┴─────────────────────┘
//!
//! LTV (with header):
//! ┌────────┬───────────┬─────────────┬────────────────────┬───────────┐
//! │ Header │ OffsetMap │ OffsetLists │ InvalidatedOffsets │ LengthMap │
//! └────────┴───────────┴─────────────┴────────────────────┴───────────┘
//!                                                           (optional)
//! ```
//!
//! Without a header, LTV elements are found by walking the sequence; every
//! element is length-prefixed.
//!
//! | format id | layout | header | length map |
//! |-----------|--------|--------|------------|
//! | `0`       | V0     | no     | no         |
//! | `1`       | LTV    | no     | no         |
//! | `2`       | LTV    | yes    | no         |
//! | `3`       | LTV    | yes    | yes        |

mod header;
mod legacy;
mod ltv;

use std::collections::BTreeSet;

use crate::error::{Result, StoreError};
use crate::index::{CuckooConfig, KeyCuckoo, LengthIndex};
use crate::offset_list::OffsetListStore;

pub use header::MetadataHeader;
pub use ltv::{encode_element, read_element, Element, ElementType, ELEMENT_HEADER_BYTES};

// =============================================================================
// Storage Format
// =============================================================================

/// Metadata layout selected by a namespace's storage format identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageFormat {
    id: u8,
}

impl StorageFormat {
    pub const LEGACY: Self = Self { id: 0 };
    pub const LTV: Self = Self { id: 1 };
    pub const LTV_WITH_HEADER: Self = Self { id: 2 };
    pub const LTV_INDEXED_LENGTHS: Self = Self { id: 3 };

    /// Parse the identifier carried in namespace options
    pub fn parse(id: &str) -> Result<Self> {
        match id.trim().parse::<u8>() {
            Ok(id @ 0..=3) => Ok(Self { id }),
            _ => Err(StoreError::Config(format!("unknown storage format '{}'", id))),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Elements are length-type-value encoded
    pub fn is_ltv(&self) -> bool {
        self.id >= 1
    }

    /// Block starts with a header element
    pub fn has_header(&self) -> bool {
        self.id >= 2
    }

    /// Block carries a length map
    pub fn lengths_indexed(&self) -> bool {
        self.id >= 3
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Serialized pieces of a segment's in-memory structures
#[derive(Debug)]
pub struct MetadataImage<'a> {
    pub index: Vec<u8>,
    pub offset_lists: Vec<u8>,
    pub invalidated: &'a BTreeSet<u32>,
    pub lengths: Option<&'a LengthIndex>,
}

/// Encode a full metadata block.
///
/// Element order: header (if any), OffsetMap, OffsetLists,
/// InvalidatedOffsets, LengthMap (if lengths are indexed).
pub fn encode(format: StorageFormat, image: &MetadataImage<'_>) -> Vec<u8> {
    if !format.is_ltv() {
        return legacy::encode(&image.index, &image.offset_lists);
    }

    let mut elements = vec![
        encode_element(ElementType::OffsetMap, &image.index),
        encode_element(ElementType::OffsetLists, &image.offset_lists),
        encode_element(
            ElementType::InvalidatedOffsets,
            &encode_invalidated(image.invalidated),
        ),
    ];
    let mut types = vec![
        ElementType::OffsetMap,
        ElementType::OffsetLists,
        ElementType::InvalidatedOffsets,
    ];
    if format.lengths_indexed() {
        let lengths = image
            .lengths
            .map(LengthIndex::to_bytes)
            .unwrap_or_else(|| LengthIndex::new().to_bytes());
        elements.push(encode_element(ElementType::LengthMap, &lengths));
        types.push(ElementType::LengthMap);
    }

    let mut out = Vec::new();
    if format.has_header() {
        let layout: Vec<_> = types
            .iter()
            .zip(elements.iter())
            .map(|(t, e)| (*t, e.len()))
            .collect();
        out.extend_from_slice(&MetadataHeader::for_elements(&layout).to_element());
    }
    for element in elements {
        out.extend_from_slice(&element);
    }
    out
}

fn encode_invalidated(offsets: &BTreeSet<u32>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + offsets.len() * 4);
    out.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out
}

fn decode_invalidated(value: &[u8]) -> Result<BTreeSet<u32>> {
    let word = |at: usize| {
        value
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| StoreError::Format("invalidated offsets truncated".to_string()))
    };
    let count = word(0)? as usize;
    (0..count).map(|i| word(4 + i * 4)).collect()
}

// =============================================================================
// Reading
// =============================================================================

/// Structures rebuilt from a metadata block
#[derive(Debug)]
pub struct SegmentMetadata {
    pub index: KeyCuckoo,
    pub offset_lists: OffsetListStore,

    /// `None` for legacy blocks, which do not track invalidations
    pub invalidated: Option<BTreeSet<u32>>,

    /// Present only when the format indexes lengths
    pub lengths: Option<LengthIndex>,
}

impl SegmentMetadata {
    /// Empty structures for a segment that has no records yet
    pub fn empty(index: CuckooConfig) -> Result<Self> {
        Ok(Self {
            index: KeyCuckoo::new(index)?,
            offset_lists: OffsetListStore::new(),
            invalidated: Some(BTreeSet::new()),
            lengths: Some(LengthIndex::new()),
        })
    }
}

enum Layout<'a> {
    Legacy,
    Ltv {
        header: Option<MetadataHeader>,
        values: &'a [u8],
    },
}

/// A parsed view over a metadata block; elements are decoded on demand
pub struct MetadataBlock<'a> {
    buf: &'a [u8],
    format: StorageFormat,
    layout: Layout<'a>,
}

impl<'a> MetadataBlock<'a> {
    /// Parse the block's framing (and header, when present)
    pub fn parse(buf: &'a [u8], format: StorageFormat) -> Result<Self> {
        let layout = if !format.is_ltv() {
            Layout::Legacy
        } else if format.has_header() {
            let element = read_element(buf, 0)?;
            if element.element_type != ElementType::Header {
                return Err(StoreError::Format(format!(
                    "metadata block starts with {:?}, expected Header",
                    element.element_type
                )));
            }
            Layout::Ltv {
                header: Some(MetadataHeader::from_value(element.value)?),
                values: &buf[element.length()..],
            }
        } else {
            Layout::Ltv {
                header: None,
                values: buf,
            }
        };
        Ok(Self {
            buf,
            format,
            layout,
        })
    }

    pub fn format(&self) -> StorageFormat {
        self.format
    }

    /// Value bytes of one element, or `None` if the block has none
    pub fn element(&self, element_type: ElementType) -> Result<Option<&'a [u8]>> {
        match &self.layout {
            Layout::Legacy => {
                let (index, lists) = legacy::split(self.buf)?;
                Ok(match element_type {
                    ElementType::OffsetMap => Some(index),
                    ElementType::OffsetLists => Some(lists),
                    _ => None,
                })
            }
            Layout::Ltv {
                header: Some(header),
                values,
            } => match header.element_offset(element_type) {
                None => Ok(None),
                Some(offset) => {
                    let element = read_element(values, offset)?;
                    if element.element_type != element_type {
                        return Err(StoreError::Format(format!(
                            "metadata header points at {:?} for {:?}",
                            element.element_type, element_type
                        )));
                    }
                    Ok(Some(element.value))
                }
            },
            Layout::Ltv {
                header: None,
                values,
            } => {
                let mut offset = 0;
                while offset < values.len() {
                    let element = read_element(values, offset)?;
                    if element.element_type == element_type {
                        return Ok(Some(element.value));
                    }
                    offset += element.length();
                }
                Ok(None)
            }
        }
    }

    /// Rebuild every structure the block describes
    pub fn load(&self) -> Result<SegmentMetadata> {
        let index_bytes = self.element(ElementType::OffsetMap)?.ok_or_else(|| {
            StoreError::Format("metadata block has no OffsetMap element".to_string())
        })?;
        let index = KeyCuckoo::from_bytes(index_bytes)?;

        let offset_lists = match self.element(ElementType::OffsetLists)? {
            Some(bytes) => OffsetListStore::from_bytes(bytes)?.0,
            None => OffsetListStore::new(),
        };

        let invalidated = if self.format.is_ltv() {
            Some(match self.element(ElementType::InvalidatedOffsets)? {
                Some(bytes) => decode_invalidated(bytes)?,
                None => BTreeSet::new(),
            })
        } else {
            None
        };

        let lengths = if self.format.lengths_indexed() {
            self.element(ElementType::LengthMap)?
                .map(LengthIndex::from_bytes)
                .transpose()?
        } else {
            None
        };

        Ok(SegmentMetadata {
            index,
            offset_lists,
            invalidated,
            lengths,
        })
    }
}
