//! Argon2id password hashing for stored credentials.
//!
//! Hosts never keep plaintext passwords. A credential entry holds a PHC
//! string (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`) that carries its
//! own parameters and salt, so entries hashed under different
//! [`PasswordParams`] verify side by side.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, ParamsBuilder, Version};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::CipherError;

/// Parameters for Argon2id password hashing.
///
/// Default values follow OWASP recommendations:
/// - Memory: 64 MiB (65536 KiB)
/// - Iterations: 4
/// - Parallelism: 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost_kib: u32,
    /// Number of iterations (default: 4)
    pub iterations: u32,
    /// Degree of parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        Self {
            memory_cost_kib: 65536,
            iterations: 4,
            parallelism: 4,
        }
    }
}

impl PasswordParams {
    /// Low-cost parameters for tests and constrained devices.
    ///
    /// **Warning:** Not suitable for credentials exposed to offline attack.
    #[must_use]
    pub fn low_security() -> Self {
        Self {
            memory_cost_kib: 4096,
            iterations: 2,
            parallelism: 1,
        }
    }

    /// Validate parameters are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::PasswordHash` describing the offending field.
    pub fn validate(&self) -> Result<(), CipherError> {
        if self.memory_cost_kib < 8 {
            return Err(CipherError::PasswordHash(
                "memory_cost_kib must be at least 8 KiB".into(),
            ));
        }
        if self.iterations < 1 {
            return Err(CipherError::PasswordHash(
                "iterations must be at least 1".into(),
            ));
        }
        if self.parallelism < 1 || self.parallelism > 255 {
            return Err(CipherError::PasswordHash(
                "parallelism must be between 1 and 255".into(),
            ));
        }
        Ok(())
    }

    fn build(&self) -> Result<Params, CipherError> {
        self.validate()?;

        ParamsBuilder::new()
            .m_cost(self.memory_cost_kib)
            .t_cost(self.iterations)
            .p_cost(self.parallelism)
            .build()
            .map_err(|e| CipherError::PasswordHash(format!("Argon2 params: {e}")))
    }
}

/// Hash a password into a PHC string with a fresh random salt.
///
/// # Errors
///
/// Returns `CipherError::PasswordHash` if the parameters are invalid or
/// hashing fails.
pub fn hash_password(password: &[u8], params: &PasswordParams) -> Result<String, CipherError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.build()?);
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(password, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CipherError::PasswordHash(e.to_string()))
}

/// Check a password against a stored PHC string.
///
/// A malformed stored hash is an error; a well-formed hash that does not
/// match returns `Ok(false)`.
///
/// # Errors
///
/// Returns `CipherError::PasswordHash` if `phc` cannot be parsed.
pub fn verify_password(password: &[u8], phc: &str) -> Result<bool, CipherError> {
    let parsed = PasswordHash::new(phc).map_err(|e| CipherError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password, &parsed)
        .is_ok())
}
