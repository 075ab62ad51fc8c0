//! Cryptographic primitives for the credential store.
//!
//! Provides key derivation, authenticated encryption of individual secrets,
//! and keyfile handling.

pub mod aead;
pub mod kdf;
pub mod keyfile;

pub use aead::{decrypt, encrypt, generate_salt};
pub use kdf::{DerivedKey, KdfParams, KeyMaterial, derive_key};
pub use keyfile::{generate_keyfile, load_keyfile};

use thiserror::Error;

/// Length of the salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the nonce (12 bytes for AES-256-GCM).
pub const NONCE_LEN: usize = 12;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;
/// Length of a freshly generated keyfile.
pub const KEYFILE_LEN: usize = 32;

/// Known plaintext sealed into the store's verification token.
pub const SENTINEL: &str = "essh-verify";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("OS random generator unavailable")]
    Random,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed")]
    Encrypt,

    /// Every decryption failure collapses into this variant. `detail` is
    /// only meant for diagnostics and must not drive control flow.
    #[error("decryption failed")]
    Decrypt { detail: &'static str },
}
