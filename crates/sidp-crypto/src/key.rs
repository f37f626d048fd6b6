//! Pre-shared session key.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CipherError;
use crate::hash;

/// Session key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// A 256-bit pre-shared session key.
///
/// The key is zeroized on drop and can be wiped explicitly with
/// [`Zeroize::zeroize`]. `Debug` prints a fingerprint, never the key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from slice.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::InvalidKeyLength` if slice length is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CipherError> {
        if slice.len() != KEY_SIZE {
            return Err(CipherError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derive a key from a pre-shared passphrase with the BLAKE3 KDF.
    #[must_use]
    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        Self(hash::derive_session_key(passphrase))
    }

    /// Generate a random key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::RandomFailed` if the CSPRNG fails.
    pub fn generate() -> Result<Self, CipherError> {
        crate::random::random_32().map(Self)
    }

    /// Get raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with extreme care - this exposes the raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Whether every byte is zero (a wiped or never-set key).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Short printable fingerprint of the key.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 8] {
        hash::fingerprint(&self.0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fp = self.fingerprint();
        write!(f, "SessionKey(")?;
        for b in fp {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_length_check() {
        assert!(SessionKey::from_slice(&[1u8; 32]).is_ok());
        assert_eq!(
            SessionKey::from_slice(&[1u8; 31]).unwrap_err(),
            CipherError::InvalidKeyLength {
                expected: 32,
                actual: 31
            }
        );
    }

    #[test]
    fn test_zeroize_wipes_key() {
        let mut key = SessionKey::new([0xAB; KEY_SIZE]);
        assert!(!key.is_zero());
        key.zeroize();
        assert!(key.is_zero());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SessionKey::new([0xAB; KEY_SIZE]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("abababab"));
        assert!(printed.starts_with("SessionKey("));
    }

    #[test]
    fn test_passphrase_keys_match() {
        let a = SessionKey::from_passphrase(b"pre-shared");
        let b = SessionKey::from_passphrase(b"pre-shared");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
