//! BLAKE3 hashing implementation
//!
//! All content hashing in OX uses BLAKE3. Block hashes arriving from the
//! proof-of-work layer are treated as opaque 32-byte values and only wrapped
//! here for comparison and hex display.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte hash output
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Create a zero hash
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// Create hash from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Create hash from a 64-character hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

/// Hash arbitrary bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash(*hash.as_bytes())
}

/// Double hash (hash of hash), used for address checksums
pub fn double_hash(data: &[u8]) -> Hash {
    let first = hash_bytes(data);
    hash_bytes(&first.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"key set payload";
        assert_eq!(hash_bytes(data), hash_bytes(data));
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(hash_bytes(b"height 100"), hash_bytes(b"height 101"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = hash_bytes(b"checkpoint");
        let recovered = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&"ff".repeat(33)).is_err());
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let s = "zz".repeat(32);
        assert!(Hash::from_hex(&s).is_err());
    }

    #[test]
    fn test_zero_hash() {
        assert_eq!(Hash::zero().0, [0u8; 32]);
        assert_eq!(Hash::default(), Hash::zero());
    }
}
