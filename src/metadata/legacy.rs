//! Legacy (V0) metadata layout
//!
//! ```text
//! ┌──────────────────┬─────────────────────┬──────────────────────┐
//! │ index length (4) │ key index image     │ offset lists image   │
//! └──────────────────┴─────────────────────┴──────────────────────┘
//! ```
//! No header, no invalidated offsets, no length map.

use crate::error::{Result, StoreError};

/// Encode a V0 block
pub fn encode(index: &[u8], offset_lists: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + index.len() + offset_lists.len());
    out.extend_from_slice(&(index.len() as u32).to_le_bytes());
    out.extend_from_slice(index);
    out.extend_from_slice(offset_lists);
    out
}

/// Split a V0 block into its key index and offset list images
pub fn split(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let length = buf
        .get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(|| StoreError::Format("legacy metadata shorter than 4 bytes".to_string()))?;
    let index = buf.get(4..4 + length).ok_or_else(|| {
        StoreError::Format(format!(
            "legacy key index of {} bytes exceeds metadata block of {}",
            length,
            buf.len()
        ))
    })?;
    Ok((index, &buf[4 + length..]))
}
