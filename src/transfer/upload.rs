//! Sending one file to a remote `scp -t`.
//!
//! ```text
//! Start -> AwaitInitialAck -> SendHeader -> AwaitHeaderAck
//!       -> StreamContent -> SendCompletion -> AwaitFinalAck -> Done
//! ```
//!
//! Any error moves the machine to `Failed`.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::{debug, info};

use super::{Channel, FileHeader, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Start,
    AwaitInitialAck,
    SendHeader,
    AwaitHeaderAck,
    StreamContent,
    SendCompletion,
    AwaitFinalAck,
    Done,
    Failed,
}

pub struct Upload<S> {
    header: FileHeader,
    source: S,
    state: UploadState,
}

impl Upload<File> {
    /// Prepares an upload of a local regular file, announcing its size and
    /// permission bits.
    pub fn from_path(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path).map_err(TransferError::Local)?;
        let meta = file.metadata().map_err(TransferError::Local)?;
        if meta.is_dir() {
            return Err(TransferError::Usage(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::Usage(format!("{} has no file name", path.display())))?;

        Ok(Self::new(
            FileHeader::new(file_mode(&meta), meta.len(), filename),
            file,
        ))
    }
}

impl<S: Read> Upload<S> {
    pub fn new(header: FileHeader, source: S) -> Self {
        Self {
            header,
            source,
            state: UploadState::Start,
        }
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Performs one transition and returns the new state.
    pub fn step<R: Read, W: Write>(
        &mut self,
        channel: &mut Channel<R, W>,
    ) -> Result<UploadState, TransferError> {
        let result = self.advance(channel);
        self.state = match &result {
            Ok(next) => *next,
            Err(_) => UploadState::Failed,
        };
        debug!(state = ?self.state, "upload transition");
        result
    }

    /// Drives the machine to completion. Returns the number of bytes sent.
    pub fn run<R: Read, W: Write>(
        mut self,
        channel: &mut Channel<R, W>,
    ) -> Result<u64, TransferError> {
        loop {
            match self.step(channel)? {
                UploadState::Done => break,
                UploadState::Failed => {
                    return Err(TransferError::Usage("upload already failed".into()));
                }
                _ => {}
            }
        }
        info!(
            file = %self.header.filename,
            bytes = self.header.size,
            "upload finished"
        );
        Ok(self.header.size)
    }

    fn advance<R: Read, W: Write>(
        &mut self,
        channel: &mut Channel<R, W>,
    ) -> Result<UploadState, TransferError> {
        use UploadState::*;

        match self.state {
            Start => Ok(AwaitInitialAck),
            AwaitInitialAck => {
                channel.expect_ack()?;
                Ok(SendHeader)
            }
            SendHeader => {
                channel.send_header(&self.header)?;
                Ok(AwaitHeaderAck)
            }
            AwaitHeaderAck => {
                channel.expect_ack()?;
                Ok(StreamContent)
            }
            StreamContent => {
                channel.send_from(self.header.size, &mut self.source)?;
                Ok(SendCompletion)
            }
            SendCompletion => {
                channel.send_ok()?;
                Ok(AwaitFinalAck)
            }
            AwaitFinalAck => {
                channel.expect_ack()?;
                Ok(Done)
            }
            Done => Ok(Done),
            Failed => Ok(Failed),
        }
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}
