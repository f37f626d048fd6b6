//! # SIDP Crypto
//!
//! Cryptographic plugins for the SIDP transport engine.
//!
//! This crate provides:
//! - Two interchangeable authenticated cipher plugins behind [`Cipher`]
//! - Pre-shared 256-bit session keys with zeroize-on-drop
//! - BLAKE3 hashing and key derivation
//! - Argon2id credential hashing
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Block cipher plugin | AES-256-GCM | 256-bit key |
//! | Stream cipher plugin | XSalsa20-Poly1305 | 256-bit key |
//! | Hash | BLAKE3 | 128-bit collision |
//! | Passphrase KDF | BLAKE3 derive_key | 256-bit |
//! | Credential hashing | Argon2id | memory-hard |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cipher;
pub mod constant_time;
pub mod error;
pub mod hash;
pub mod key;
pub mod password;
pub mod random;

pub use cipher::{Cipher, CipherKind};
pub use error::CipherError;
pub use key::{KEY_SIZE, SessionKey};
