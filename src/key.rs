//! DHT keys
//!
//! A key is a 128-bit value, normally a digest of the user key computed by
//! the client. Keys are already well distributed, but the index still
//! mixes them per sub-table so that the sub-tables disagree on placement.

use std::fmt;

/// Number of bytes a key occupies at the start of every record
pub const KEY_BYTES: usize = 16;

/// Fixed-width identifier of one logical entry in a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DhtKey {
    msl: u64,
    lsl: u64,
}

impl DhtKey {
    pub const fn new(msl: u64, lsl: u64) -> Self {
        Self { msl, lsl }
    }

    /// Most significant 64 bits
    pub fn msl(&self) -> u64 {
        self.msl
    }

    /// Least significant 64 bits
    pub fn lsl(&self) -> u64 {
        self.lsl
    }

    /// Big-endian image written into the data region
    pub fn to_bytes(&self) -> [u8; KEY_BYTES] {
        let mut out = [0u8; KEY_BYTES];
        out[..8].copy_from_slice(&self.msl.to_be_bytes());
        out[8..].copy_from_slice(&self.lsl.to_be_bytes());
        out
    }

    /// Read a key from the first [`KEY_BYTES`] of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < KEY_BYTES {
            return None;
        }
        let msl = u64::from_be_bytes(bytes[..8].try_into().ok()?);
        let lsl = u64::from_be_bytes(bytes[8..KEY_BYTES].try_into().ok()?);
        Some(Self { msl, lsl })
    }

    /// Seeded 64-bit mix of both halves (splitmix64 finalizer)
    pub(crate) fn hash_with_seed(&self, seed: u64) -> u64 {
        let mut z = self.lsl ^ self.msl.rotate_left(29) ^ seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl fmt::Display for DhtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:016x}", self.msl, self.lsl)
    }
}
