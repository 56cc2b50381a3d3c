//! State Hashing for Divergence Detection
//!
//! Deterministic MD5 hashing of canonically serialised game state.
//! Two peers that executed the identical frame stream must produce
//! byte-identical hashes at every frame; a mismatch is the desync signal.
//! The hash is a diagnostic, never a safety mechanism.

use md5::{Digest, Md5};

use super::fixed::Fixed;

/// Hash output type (128 bits / 16 bytes)
pub type StateHash = [u8; 16];

/// Deterministic hasher for game state.
///
/// Wraps MD5 with helpers for the fixed-layout integer types the
/// simulation uses. Order of updates is critical for determinism:
/// callers must feed fields in a fixed sequence, entities sorted by id.
pub struct StateHasher {
    hasher: Md5,
}

impl StateHasher {
    /// Create a new hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a game state snapshot.
    pub fn for_state() -> Self {
        Self::new(b"FRAMESYNC_STATE_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u16 value (big-endian).
    #[inline]
    pub fn update_u16(&mut self, value: u16) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a u32 value (big-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with an i32 value (big-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a Fixed value.
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.update_i32(value);
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute a hash of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> StateHash {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Render a hash as lowercase hex for logs and diagnostics.
pub fn hash_hex(hash: &StateHash) -> String {
    hex::encode(hash)
}

// =============================================================================
// TESTS
// =============================================================================
