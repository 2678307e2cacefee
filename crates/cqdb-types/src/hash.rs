//! Content-hash abstraction.
//!
//! The core is polymorphic over the hash primitive: anything with a fixed
//! byte width, raw-byte equality and total ordering works. [`Hash256`] is
//! the 32-byte instantiation used by the tests and by typical callers.

use std::fmt;

use sha2::{Digest, Sha256};

/// A fixed-width, byte-serializable content hash.
///
/// Equality and ordering must be defined by raw-byte comparison, so that
/// the on-disk order of hash sets is deterministic across platforms.
pub trait ContentHash: Clone + Eq + Ord {
    /// Byte width of the serialized hash.
    const WIDTH: usize;

    /// The raw bytes, `WIDTH` long.
    fn as_bytes(&self) -> &[u8];

    /// Rebuild from raw bytes. `bytes` must be exactly `WIDTH` long.
    fn from_bytes(bytes: &[u8]) -> Self;
}

/// A 32-byte content hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Wrap raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    /// SHA-256 of arbitrary content.
    #[must_use]
    pub fn digest(content: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&Sha256::digest(content));
        Hash256(out)
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl ContentHash for Hash256 {
    const WIDTH: usize = 32;

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), Self::WIDTH);
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Hash256(out)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn digest_is_stable() {
        let a = Hash256::digest(b"foo");
        let b = Hash256::digest(b"foo");
        let c = Hash256::digest(b"bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let h = Hash256::new(raw);
        assert_eq!(h, Hash256::from_bytes(h.as_bytes()));
    }

    #[test]
    fn ordering_is_byte_lexicographic() {
        let lo = Hash256::new([0u8; 32]);
        let mut raw = [0u8; 32];
        raw[0] = 1;
        let hi = Hash256::new(raw);
        assert!(lo < hi);
    }

    #[test]
    fn hex_rendering() {
        let mut raw = [0u8; 32];
        raw[0] = 0xab;
        raw[31] = 0x01;
        let hex = Hash256::new(raw).to_hex();
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
        assert_eq!(hex.len(), 64);
    }
}
