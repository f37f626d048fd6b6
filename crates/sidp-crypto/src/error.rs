//! Cryptographic error types.

use thiserror::Error;

/// Cipher plugin and key handling errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Integrity verification failed (tag mismatch, wrong key, tampered or
    /// truncated ciphertext)
    #[error("decryption failed: authentication failure")]
    AuthenticationFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Unknown cipher identifier on the wire
    #[error("unknown cipher id: {0}")]
    UnknownCipher(u8),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Password hashing or hash parsing failed
    #[error("password hash error: {0}")]
    PasswordHash(String),
}
