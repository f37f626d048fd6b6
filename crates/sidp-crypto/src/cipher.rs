//! Cipher plugins.
//!
//! Two interchangeable authenticated ciphers sit behind the [`Cipher`]
//! trait:
//!
//! | Kind | Construction | Nonce | Tag |
//! |------|--------------|-------|-----|
//! | [`CipherKind::Aes256`] | AES-256-GCM | 96-bit random | 128-bit |
//! | [`CipherKind::XSalsa20`] | XSalsa20-Poly1305 (`secretbox`) | 192-bit random | 128-bit |
//!
//! The plugin owns nonce generation: every call to [`Cipher::encrypt`] draws
//! a fresh nonce from the OS CSPRNG and prepends it to the output, so the
//! sealed form is `nonce || ciphertext || tag`. [`Cipher::encrypt_with_nonce`]
//! is the deterministic form used by tests and known-answer checks.
//!
//! `secretbox` has no associated data input. The XSalsa20 plugin seals a
//! 16-byte BLAKE3 digest of the associated data in front of the plaintext
//! and checks it in constant time on open.
//!
//! ## Usage
//!
//! ```
//! use sidp_crypto::{CipherKind, SessionKey};
//!
//! let key = SessionKey::new([0x42; 32]);
//! let sealed = CipherKind::XSalsa20.encrypt(&key, b"secret", b"header").unwrap();
//! let opened = CipherKind::XSalsa20.decrypt(&key, &sealed, b"header").unwrap();
//! assert_eq!(opened, b"secret");
//! ```

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use crypto_secretbox::XSalsa20Poly1305;
use serde::{Deserialize, Serialize};

use crate::constant_time::verify_16;
use crate::error::CipherError;
use crate::hash::aad_digest;
use crate::key::SessionKey;
use crate::random::fill_random;

/// Authentication tag size (16 bytes / 128 bits), shared by both plugins.
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM nonce size (12 bytes / 96 bits).
pub const AES_NONCE_SIZE: usize = 12;

/// XSalsa20-Poly1305 nonce size (24 bytes / 192 bits).
pub const XSALSA_NONCE_SIZE: usize = 24;

/// Size of the associated-data digest sealed by the XSalsa20 plugin.
const AAD_DIGEST_SIZE: usize = 16;

/// Selector for a cipher plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherKind {
    /// AES-256-GCM
    Aes256,
    /// XSalsa20-Poly1305
    XSalsa20,
}

impl CipherKind {
    /// Cipher protecting handshake messages, independent of negotiation.
    pub const BASELINE: Self = Self::Aes256;

    /// Identifier carried in message headers.
    #[must_use]
    pub fn wire_id(self) -> u8 {
        match self {
            Self::Aes256 => 1,
            Self::XSalsa20 => 2,
        }
    }

    /// Parse a wire identifier.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::UnknownCipher` for unassigned identifiers.
    pub fn from_wire_id(id: u8) -> Result<Self, CipherError> {
        match id {
            1 => Ok(Self::Aes256),
            2 => Ok(Self::XSalsa20),
            other => Err(CipherError::UnknownCipher(other)),
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes256 => "AES-256-GCM",
            Self::XSalsa20 => "XSalsa20-Poly1305",
        }
    }

    /// The plugin implementing this kind.
    #[must_use]
    pub fn cipher(self) -> &'static dyn Cipher {
        match self {
            Self::Aes256 => &Aes256GcmCipher,
            Self::XSalsa20 => &XSalsa20Poly1305Cipher,
        }
    }

    /// Bytes added to a plaintext by sealing.
    #[must_use]
    pub fn overhead(self) -> usize {
        self.cipher().overhead()
    }

    /// Seal `plaintext` under `key` with a fresh nonce.
    ///
    /// # Errors
    ///
    /// See [`Cipher::encrypt`].
    pub fn encrypt(
        self,
        key: &SessionKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        self.cipher().encrypt(key, plaintext, aad)
    }

    /// Open a sealed message.
    ///
    /// # Errors
    ///
    /// See [`Cipher::decrypt`].
    pub fn decrypt(
        self,
        key: &SessionKey,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        self.cipher().decrypt(key, sealed, aad)
    }
}

/// Authenticated cipher contract.
pub trait Cipher: Send + Sync {
    /// Which kind this plugin implements.
    fn kind(&self) -> CipherKind;

    /// Nonce length in bytes.
    fn nonce_size(&self) -> usize;

    /// Bytes added to a plaintext by sealing (nonce, tag and any framing).
    fn overhead(&self) -> usize;

    /// Seal with a caller-chosen nonce. Output is `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::EncryptionFailed` if the nonce has the wrong
    /// length or the primitive fails.
    fn encrypt_with_nonce(
        &self,
        key: &SessionKey,
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError>;

    /// Seal with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::RandomFailed` if no nonce can be drawn, or
    /// `CipherError::EncryptionFailed` if the primitive fails.
    fn encrypt(
        &self,
        key: &SessionKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let mut nonce = vec![0u8; self.nonce_size()];
        fill_random(&mut nonce)?;
        self.encrypt_with_nonce(key, &nonce, plaintext, aad)
    }

    /// Open `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::AuthenticationFailed` if the input is too short
    /// or fails integrity verification.
    fn decrypt(&self, key: &SessionKey, sealed: &[u8], aad: &[u8])
    -> Result<Vec<u8>, CipherError>;
}

/// AES-256-GCM plugin (block cipher).
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCipher;

impl Cipher for Aes256GcmCipher {
    fn kind(&self) -> CipherKind {
        CipherKind::Aes256
    }

    fn nonce_size(&self) -> usize {
        AES_NONCE_SIZE
    }

    fn overhead(&self) -> usize {
        AES_NONCE_SIZE + TAG_SIZE
    }

    fn encrypt_with_nonce(
        &self,
        key: &SessionKey,
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if nonce.len() != AES_NONCE_SIZE {
            return Err(CipherError::EncryptionFailed);
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        let ciphertext = cipher
            .encrypt(
                GenericArray::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(AES_NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(
        &self,
        key: &SessionKey,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < AES_NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::AuthenticationFailed);
        }

        let (nonce, ciphertext) = sealed.split_at(AES_NONCE_SIZE);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

        cipher
            .decrypt(
                GenericArray::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CipherError::AuthenticationFailed)
    }
}

/// XSalsa20-Poly1305 plugin (stream cipher).
///
/// The 192-bit nonce makes random collisions under one key negligible
/// (birthday bound is 2^96 messages).
#[derive(Debug, Clone, Copy, Default)]
pub struct XSalsa20Poly1305Cipher;

impl Cipher for XSalsa20Poly1305Cipher {
    fn kind(&self) -> CipherKind {
        CipherKind::XSalsa20
    }

    fn nonce_size(&self) -> usize {
        XSALSA_NONCE_SIZE
    }

    fn overhead(&self) -> usize {
        XSALSA_NONCE_SIZE + AAD_DIGEST_SIZE + TAG_SIZE
    }

    fn encrypt_with_nonce(
        &self,
        key: &SessionKey,
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if nonce.len() != XSALSA_NONCE_SIZE {
            return Err(CipherError::EncryptionFailed);
        }

        let mut inner = Vec::with_capacity(AAD_DIGEST_SIZE + plaintext.len());
        inner.extend_from_slice(&aad_digest(aad));
        inner.extend_from_slice(plaintext);

        let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(nonce), inner.as_slice())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(XSALSA_NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(
        &self,
        key: &SessionKey,
        sealed: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < self.overhead() {
            return Err(CipherError::AuthenticationFailed);
        }

        let (nonce, ciphertext) = sealed.split_at(XSALSA_NONCE_SIZE);
        let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
        let mut inner = cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::AuthenticationFailed)?;

        let mut digest = [0u8; AAD_DIGEST_SIZE];
        digest.copy_from_slice(&inner[..AAD_DIGEST_SIZE]);
        if !verify_16(&digest, &aad_digest(aad)) {
            return Err(CipherError::AuthenticationFailed);
        }

        inner.drain(..AAD_DIGEST_SIZE);
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [CipherKind; 2] = [CipherKind::Aes256, CipherKind::XSalsa20];

    fn key() -> SessionKey {
        SessionKey::new([0x42u8; 32])
    }

    #[test]
    fn test_roundtrip_both_kinds() {
        for kind in KINDS {
            let sealed = kind.encrypt(&key(), b"Hello, SIDP!", b"aad").unwrap();
            assert_eq!(sealed.len(), 12 + kind.overhead());
            let opened = kind.decrypt(&key(), &sealed, b"aad").unwrap();
            assert_eq!(opened, b"Hello, SIDP!");
        }
    }

    #[test]
    fn test_empty_plaintext() {
        for kind in KINDS {
            let sealed = kind.encrypt(&key(), b"", b"").unwrap();
            assert_eq!(sealed.len(), kind.overhead());
            assert!(kind.decrypt(&key(), &sealed, b"").unwrap().is_empty());
        }
    }

    #[test]
    fn test_tamper_detection() {
        for kind in KINDS {
            let mut sealed = kind.encrypt(&key(), b"payload", b"").unwrap();
            let last = sealed.len() - 1;
            sealed[last] ^= 0xFF;
            assert_eq!(
                kind.decrypt(&key(), &sealed, b""),
                Err(CipherError::AuthenticationFailed)
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let other = SessionKey::new([0x24u8; 32]);
        for kind in KINDS {
            let sealed = kind.encrypt(&key(), b"secret", b"").unwrap();
            assert_eq!(
                kind.decrypt(&other, &sealed, b""),
                Err(CipherError::AuthenticationFailed)
            );
        }
    }

    #[test]
    fn test_wrong_aad_fails() {
        for kind in KINDS {
            let sealed = kind.encrypt(&key(), b"secret", b"aad1").unwrap();
            assert_eq!(
                kind.decrypt(&key(), &sealed, b"aad2"),
                Err(CipherError::AuthenticationFailed)
            );
        }
    }

    #[test]
    fn test_truncated_input_fails() {
        for kind in KINDS {
            let sealed = kind.encrypt(&key(), b"secret", b"").unwrap();
            assert_eq!(
                kind.decrypt(&key(), &sealed[..kind.overhead() - 1], b""),
                Err(CipherError::AuthenticationFailed)
            );
            assert_eq!(
                kind.decrypt(&key(), &[], b""),
                Err(CipherError::AuthenticationFailed)
            );
        }
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        for kind in KINDS {
            let a = kind.encrypt(&key(), b"same", b"").unwrap();
            let b = kind.encrypt(&key(), b"same", b"").unwrap();
            let n = kind.cipher().nonce_size();
            assert_ne!(a[..n], b[..n]);
            assert_ne!(a, b);
        }
    }

    #[test]
    fn test_encrypt_with_nonce_is_deterministic() {
        let cipher = XSalsa20Poly1305Cipher;
        let nonce = [7u8; XSALSA_NONCE_SIZE];
        let a = cipher.encrypt_with_nonce(&key(), &nonce, b"data", b"h").unwrap();
        let b = cipher.encrypt_with_nonce(&key(), &nonce, b"data", b"h").unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..XSALSA_NONCE_SIZE], &nonce);
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        assert_eq!(
            Aes256GcmCipher.encrypt_with_nonce(&key(), &[0u8; 24], b"x", b""),
            Err(CipherError::EncryptionFailed)
        );
        assert_eq!(
            XSalsa20Poly1305Cipher.encrypt_with_nonce(&key(), &[0u8; 12], b"x", b""),
            Err(CipherError::EncryptionFailed)
        );
    }

    #[test]
    fn test_ciphertexts_not_interchangeable() {
        let sealed = CipherKind::Aes256.encrypt(&key(), b"cross", b"").unwrap();
        assert!(CipherKind::XSalsa20.decrypt(&key(), &sealed, b"").is_err());
    }

    #[test]
    fn test_wire_ids() {
        for kind in KINDS {
            assert_eq!(CipherKind::from_wire_id(kind.wire_id()).unwrap(), kind);
            assert_eq!(kind.cipher().kind(), kind);
        }
        assert_eq!(
            CipherKind::from_wire_id(0),
            Err(CipherError::UnknownCipher(0))
        );
    }
}
