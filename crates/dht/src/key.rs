//! DHT key and value slot identifiers.

use alloy_primitives::{B256, keccak256};

/// Identifier of a value slot at a key.
///
/// Publishing twice with the same id at the same key replaces the previous
/// value instead of adding a second one.
pub type ValueId = u64;

/// 32-byte DHT key.
///
/// Application keys are arbitrary strings; they are hashed into a `DhtKey`
/// before touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DhtKey(pub B256);

impl DhtKey {
    /// Wrap raw key bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(B256::new(bytes))
    }

    /// Hash an application level name into a key.
    pub fn from_name(name: &str) -> Self {
        Self(keccak256(name.as_bytes()))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0.0
    }
}

impl From<[u8; 32]> for DhtKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self::new(bytes)
    }
}

impl core::fmt::Display for DhtKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_stable() {
        assert_eq!(DhtKey::from_name("alice"), DhtKey::from_name("alice"));
        assert_ne!(DhtKey::from_name("alice"), DhtKey::from_name("bob"));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let key = DhtKey::from_name("alice:profile");
        assert_eq!(DhtKey::new(*key.as_bytes()), key);
    }
}
