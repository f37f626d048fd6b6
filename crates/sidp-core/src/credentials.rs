//! Host-side credential storage.

use std::collections::HashMap;
use std::sync::OnceLock;

use sidp_crypto::password::{PasswordParams, hash_password, verify_password};

use crate::error::Error;

/// Checks user credentials during authentication.
pub trait CredentialStore {
    /// Whether `password` is correct for `username`. Unknown users are
    /// simply `false`.
    fn verify(&self, username: &str, password: &[u8]) -> bool;
}

/// In-memory store of Argon2id PHC hashes keyed by user name.
///
/// Lookups for unknown users still run one Argon2 verification against a
/// throwaway hash, so response time does not reveal which names exist.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: HashMap<String, String>,
    params: PasswordParams,
    decoy: OnceLock<Option<String>>,
}

impl MemoryCredentialStore {
    /// Empty store hashing new passwords with `params`.
    #[must_use]
    pub fn new(params: PasswordParams) -> Self {
        Self {
            users: HashMap::new(),
            params,
            decoy: OnceLock::new(),
        }
    }

    /// Hash and store a password.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cipher` if hashing fails.
    pub fn add_user(&mut self, username: &str, password: &[u8]) -> Result<(), Error> {
        let phc = hash_password(password, &self.params)?;
        self.users.insert(username.to_owned(), phc);
        Ok(())
    }

    /// Store an existing PHC hash, as loaded from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `phc` is not an Argon2 PHC string.
    pub fn insert_hash(&mut self, username: &str, phc: &str) -> Result<(), Error> {
        if !phc.starts_with("$argon2") {
            return Err(Error::Config(format!(
                "credential for '{username}' is not an Argon2 PHC string"
            )));
        }
        self.users.insert(username.to_owned(), phc.to_owned());
        Ok(())
    }

    /// Remove a user. Returns whether it was present.
    pub fn remove_user(&mut self, username: &str) -> bool {
        self.users.remove(username).is_some()
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn decoy(&self) -> Option<&str> {
        self.decoy
            .get_or_init(|| hash_password(b"decoy", &self.params).ok())
            .as_deref()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn verify(&self, username: &str, password: &[u8]) -> bool {
        match self.users.get(username) {
            Some(phc) => verify_password(password, phc).unwrap_or_else(|e| {
                tracing::warn!(username, error = %e, "stored credential is malformed");
                false
            }),
            None => {
                if let Some(decoy) = self.decoy() {
                    let _ = verify_password(password, decoy);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryCredentialStore {
        let mut store = MemoryCredentialStore::new(PasswordParams::low_security());
        store.add_user("alice", b"wonderland").unwrap();
        store
    }

    #[test]
    fn test_verify() {
        let store = store();
        assert!(store.verify("alice", b"wonderland"));
        assert!(!store.verify("alice", b"looking-glass"));
        assert!(!store.verify("bob", b"wonderland"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_hash() {
        let phc = hash_password(b"secret", &PasswordParams::low_security()).unwrap();
        let mut store = MemoryCredentialStore::new(PasswordParams::low_security());
        store.insert_hash("carol", &phc).unwrap();
        assert!(store.verify("carol", b"secret"));

        assert!(matches!(
            store.insert_hash("dave", "plaintext"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_malformed_stored_hash_rejects() {
        let mut store = MemoryCredentialStore::new(PasswordParams::low_security());
        store.insert_hash("eve", "$argon2id$garbage").unwrap();
        assert!(!store.verify("eve", b"anything"));
    }

    #[test]
    fn test_remove_user() {
        let mut store = store();
        assert!(store.remove_user("alice"));
        assert!(!store.remove_user("alice"));
        assert!(store.is_empty());
        assert!(!store.verify("alice", b"wonderland"));
    }
}
