//! Metadata header element
//!
//! Lists where each following element starts, relative to the first byte
//! after the header element itself:
//!
//! ```text
//! count (4) | [type (4) | offset (4)] * count
//! ```

use std::collections::HashMap;

use crate::error::{Result, StoreError};

use super::ltv::{encode_element, ElementType, ELEMENT_HEADER_BYTES};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataHeader {
    offsets: Vec<(ElementType, u32)>,
}

impl MetadataHeader {
    /// Header for `elements` laid out back to back, in order
    pub fn for_elements(elements: &[(ElementType, usize)]) -> Self {
        let mut offsets = Vec::with_capacity(elements.len());
        let mut position = 0u32;
        for (element_type, length) in elements {
            offsets.push((*element_type, position));
            position += *length as u32;
        }
        Self { offsets }
    }

    /// Offset of `element_type`, if the block contains one
    pub fn element_offset(&self, element_type: ElementType) -> Option<usize> {
        self.offsets
            .iter()
            .find(|(t, _)| *t == element_type)
            .map(|(_, offset)| *offset as usize)
    }

    /// Encoded header element length
    pub fn encoded_length(&self) -> usize {
        ELEMENT_HEADER_BYTES + 4 + self.offsets.len() * 8
    }

    pub fn to_element(&self) -> Vec<u8> {
        let mut value = Vec::with_capacity(4 + self.offsets.len() * 8);
        value.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());
        for (element_type, offset) in &self.offsets {
            value.extend_from_slice(&(*element_type as u32).to_le_bytes());
            value.extend_from_slice(&offset.to_le_bytes());
        }
        encode_element(ElementType::Header, &value)
    }

    /// Parse a header element's value
    pub fn from_value(value: &[u8]) -> Result<Self> {
        let word = |at: usize| -> Result<u32> {
            value
                .get(at..at + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or_else(|| StoreError::Format("metadata header truncated".to_string()))
        };
        let count = word(0)? as usize;
        let mut offsets = Vec::with_capacity(count.min(16));
        let mut seen = HashMap::new();
        for i in 0..count {
            let raw_type = word(4 + i * 8)?;
            let element_type = ElementType::from_u32(raw_type).ok_or_else(|| {
                StoreError::Format(format!("metadata header names unknown type {}", raw_type))
            })?;
            let offset = word(8 + i * 8)?;
            if seen.insert(element_type, offset).is_some() {
                return Err(StoreError::Format(format!(
                    "metadata header lists {:?} twice",
                    element_type
                )));
            }
            offsets.push((element_type, offset));
        }
        Ok(Self { offsets })
    }
}
