//! Length-type-value elements
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────────────┐
//! │ length (4) │ type (4)   │ value (length - 8)       │
//! └────────────┴────────────┴──────────────────────────┘
//! ```
//! `length` covers the whole element, so elements can be skipped without
//! understanding their value.

use crate::error::{Result, StoreError};

/// Bytes before an element's value
pub const ELEMENT_HEADER_BYTES: usize = 8;

/// Kinds of metadata element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ElementType {
    OffsetMap = 1,
    LengthMap = 2,
    OffsetLists = 3,
    InvalidatedOffsets = 4,
    Header = 5,
}

impl ElementType {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::OffsetMap),
            2 => Some(Self::LengthMap),
            3 => Some(Self::OffsetLists),
            4 => Some(Self::InvalidatedOffsets),
            5 => Some(Self::Header),
            _ => None,
        }
    }
}

/// Encode one element
pub fn encode_element(element_type: ElementType, value: &[u8]) -> Vec<u8> {
    let length = (ELEMENT_HEADER_BYTES + value.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&(element_type as u32).to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// A decoded element borrowing its value from the metadata block
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    pub element_type: ElementType,
    pub value: &'a [u8],
}

impl<'a> Element<'a> {
    /// Total encoded length
    pub fn length(&self) -> usize {
        ELEMENT_HEADER_BYTES + self.value.len()
    }
}

/// Decode the element starting at `offset` within `buf`
pub fn read_element(buf: &[u8], offset: usize) -> Result<Element<'_>> {
    let header = buf.get(offset..offset + ELEMENT_HEADER_BYTES).ok_or_else(|| {
        StoreError::Format(format!("metadata element header truncated at byte {}", offset))
    })?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let raw_type = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let element_type = ElementType::from_u32(raw_type).ok_or_else(|| {
        StoreError::Format(format!("unknown metadata element type {} at byte {}", raw_type, offset))
    })?;
    if length < ELEMENT_HEADER_BYTES {
        return Err(StoreError::Format(format!(
            "metadata element at byte {} has impossible length {}",
            offset, length
        )));
    }
    let value = buf
        .get(offset + ELEMENT_HEADER_BYTES..offset + length)
        .ok_or_else(|| {
            StoreError::Format(format!(
                "metadata element {:?} at byte {} runs past end of block",
                element_type, offset
            ))
        })?;
    Ok(Element {
        element_type,
        value,
    })
}
