use std::fmt;

use sha2::{Digest, Sha256};

use super::error::StorageError;

/// A validated SHA-256 content hash, used as the object version id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute the SHA-256 hash of the given data.
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Parse a hex-encoded content hash string.
    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        if s.len() != 64 {
            return Err(StorageError::InvalidVersion(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }

        let bytes =
            hex::decode(s).map_err(|e| StorageError::InvalidVersion(format!("invalid hex: {e}")))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StorageError::InvalidVersion("decoded to wrong length".into()))?;

        Ok(Self(arr))
    }

    /// Return the hash as a 64-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_deterministic() {
        assert_eq!(
            ContentHash::compute(b"hello world"),
            ContentHash::compute(b"hello world")
        );
    }

    #[test]
    fn compute_differs_for_different_data() {
        assert_ne!(ContentHash::compute(b"hello"), ContentHash::compute(b"world"));
    }

    #[test]
    fn hex_round_trip() {
        let original = ContentHash::compute(b"test data");
        let parsed = ContentHash::from_hex(&original.to_hex()).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(ContentHash::from_hex(&bad).is_err());
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(ContentHash::from_hex("abcd").is_err());
    }
}
