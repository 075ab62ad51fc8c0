//! Client side of the scp file-copy protocol.
//!
//! A transfer runs over a duplex byte channel (usually the stdin/stdout of a
//! remote `scp -t`/`scp -f`). The exchange is a fixed sequence of header
//! lines, payload bytes and one-byte acknowledgements; see [`upload`] and
//! [`download`] for the two state machines.

pub mod download;
pub mod target;
pub mod upload;
pub mod wire;

pub use download::{Download, DownloadState, resolve_destination};
pub use target::{Endpoint, Transfer};
pub use upload::{Upload, UploadState};
pub use wire::{Channel, FileHeader};

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The channel failed or was closed mid-transfer.
    #[error("channel I/O failed: {0}")]
    Channel(#[source] io::Error),

    /// The remote answered with a non-zero acknowledgement.
    #[error("scp error (code {code}): {message}")]
    Remote { code: u8, message: String },

    #[error("malformed scp header: {0:?}")]
    MalformedHeader(String),

    /// The local source produced fewer bytes than the header announced.
    #[error("local file ended after {actual} of {expected} bytes")]
    Truncated { expected: u64, actual: u64 },

    #[error("local file I/O failed: {0}")]
    Local(#[source] io::Error),

    #[error("{0}")]
    Usage(String),
}

/// Renders a byte count with 1024-based units, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1 << 10;
    const MB: u64 = 1 << 20;
    const GB: u64 = 1 << 30;

    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}
