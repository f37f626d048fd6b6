//! BLAKE3 hashing and key derivation.
//!
//! Provides:
//! - Fast cryptographic hashing
//! - Context-specific KDF for turning a pre-shared passphrase into a
//!   session key
//! - Short digests used to bind associated data and to fingerprint keys in
//!   logs

/// BLAKE3 hash output (32 bytes).
pub type HashOutput = [u8; 32];

/// KDF context for session keys derived from a pre-shared passphrase.
pub const SESSION_KEY_CONTEXT: &str = "sidp 2024-01 pre-shared session key";

/// KDF context for key fingerprints.
const FINGERPRINT_CONTEXT: &str = "sidp 2024-01 key fingerprint";

/// Compute BLAKE3 hash of input data.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 Key Derivation Function with context.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Create a KDF with a specific context string.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let kdf = Kdf::new(SESSION_KEY_CONTEXT);
    /// let key = kdf.derive_key(b"correct horse battery staple");
    /// ```
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Derive output from input key material.
    pub fn derive(&self, ikm: &[u8], output: &mut [u8]) {
        let mut hasher = blake3::Hasher::new_derive_key(self.context);
        hasher.update(ikm);
        hasher.finalize_xof().fill(output);
    }

    /// Derive a 32-byte key.
    #[must_use]
    pub fn derive_key(&self, ikm: &[u8]) -> [u8; 32] {
        blake3::derive_key(self.context, ikm)
    }
}

/// Derive a 32-byte session key from a pre-shared passphrase.
#[must_use]
pub fn derive_session_key(passphrase: &[u8]) -> [u8; 32] {
    Kdf::new(SESSION_KEY_CONTEXT).derive_key(passphrase)
}

/// First 8 bytes of a keyed digest of `key`, safe to print.
#[must_use]
pub fn fingerprint(key: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    Kdf::new(FINGERPRINT_CONTEXT).derive(key, &mut out);
    out
}

/// 16-byte digest of associated data, for ciphers without native AAD support.
#[must_use]
pub fn aad_digest(aad: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&hash(aad)[..16]);
    out
}
