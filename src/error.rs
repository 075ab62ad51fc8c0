use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to parse store: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("store field '{field}' is invalid: {detail}")]
    InvalidField { field: &'static str, detail: String },

    /// Raised for any failure while checking the verification token.
    /// `detail` is for diagnostics only; callers must not branch on it.
    #[error("wrong encryption password")]
    WrongPassword { detail: String },

    #[error("server '{0}' already exists")]
    DuplicateName(String),

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: &'static str },

    #[error("server '{0}' not found")]
    NotFound(String),

    #[error("failed to decrypt the secret of server '{name}'")]
    DecryptionFailure { name: String, detail: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("store already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("store does not exist at {}; run `nestsh init` first", .0.display())]
    Missing(PathBuf),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
