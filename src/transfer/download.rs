//! Receiving one file from a remote `scp -f`.
//!
//! ```text
//! Start -> SendRequest -> ReadHeader -> AckHeader -> ReceiveContent
//!       -> ReadTrailer -> SendFinalAck -> Done
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Channel, FileHeader, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Start,
    SendRequest,
    ReadHeader,
    AckHeader,
    ReceiveContent,
    ReadTrailer,
    SendFinalAck,
    Done,
    Failed,
}

/// Where a download lands: inside `destination` when it is an existing
/// directory, otherwise at `destination` itself.
pub fn resolve_destination(destination: &Path, filename: &str) -> PathBuf {
    if destination.is_dir() {
        destination.join(filename)
    } else {
        destination.to_path_buf()
    }
}

pub struct Download {
    destination: PathBuf,
    header: Option<FileHeader>,
    target: Option<PathBuf>,
    state: DownloadState,
}

impl Download {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            header: None,
            target: None,
            state: DownloadState::Start,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// The announced file, once the header has been read.
    pub fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    /// The resolved local path, once the header has been read.
    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    pub fn step<R: Read, W: Write>(
        &mut self,
        channel: &mut Channel<R, W>,
    ) -> Result<DownloadState, TransferError> {
        let result = self.advance(channel);
        self.state = match &result {
            Ok(next) => *next,
            Err(_) => DownloadState::Failed,
        };
        debug!(state = ?self.state, "download transition");
        result
    }

    /// Drives the machine to completion and returns the written path and
    /// byte count.
    pub fn run<R: Read, W: Write>(
        mut self,
        channel: &mut Channel<R, W>,
    ) -> Result<(PathBuf, u64), TransferError> {
        loop {
            match self.step(channel)? {
                DownloadState::Done => break,
                DownloadState::Failed => {
                    return Err(TransferError::Usage("download already failed".into()));
                }
                _ => {}
            }
        }

        let size = self.header.as_ref().map_or(0, |h| h.size);
        let target = self.target.unwrap_or(self.destination);
        info!(path = %target.display(), bytes = size, "download finished");
        Ok((target, size))
    }

    fn advance<R: Read, W: Write>(
        &mut self,
        channel: &mut Channel<R, W>,
    ) -> Result<DownloadState, TransferError> {
        use DownloadState::*;

        match self.state {
            Start => Ok(SendRequest),
            SendRequest => {
                channel.send_ok()?;
                Ok(ReadHeader)
            }
            ReadHeader => {
                let line = channel.read_line()?;
                if let Some(code @ (1 | 2)) = line.bytes().next() {
                    return Err(TransferError::Remote {
                        code,
                        message: line[1..].to_string(),
                    });
                }
                let header: FileHeader = line.parse()?;
                self.target = Some(resolve_destination(&self.destination, &header.filename));
                self.header = Some(header);
                Ok(AckHeader)
            }
            AckHeader => {
                channel.send_ok()?;
                Ok(ReceiveContent)
            }
            ReceiveContent => {
                let (Some(header), Some(target)) = (&self.header, &self.target) else {
                    return Err(TransferError::Usage("no header received".into()));
                };
                let file = File::create(target).map_err(TransferError::Local)?;
                let mut out = BufWriter::new(file);
                channel.read_into(header.size, &mut out)?;
                out.flush().map_err(TransferError::Local)?;
                Ok(ReadTrailer)
            }
            ReadTrailer => {
                channel.read_byte()?;
                Ok(SendFinalAck)
            }
            SendFinalAck => {
                channel.send_ok()?;
                Ok(Done)
            }
            Done => Ok(Done),
            Failed => Ok(Failed),
        }
    }
}
