//! Framing primitives: header lines, acknowledgement bytes, and the buffered
//! channel they travel over.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::str::FromStr;

use tracing::warn;

use super::TransferError;

const OK: u8 = 0;

/// The `C<mode> <size> <filename>` line announcing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub mode: u32,
    pub size: u64,
    pub filename: String,
}

impl FileHeader {
    pub fn new(mode: u32, size: u64, filename: impl Into<String>) -> Self {
        Self {
            mode: mode & 0o7777,
            size,
            filename: filename.into(),
        }
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{:04o} {} {}", self.mode, self.size, self.filename)
    }
}

impl FromStr for FileHeader {
    type Err = TransferError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || TransferError::MalformedHeader(line.to_string());

        let mut fields = line.splitn(3, ' ');
        let (Some(mode), Some(size), Some(filename)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };

        let mode = mode
            .strip_prefix('C')
            .filter(|m| !m.is_empty() && m.bytes().all(|b| (b'0'..=b'7').contains(&b)))
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .ok_or_else(malformed)?;

        let size = size
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| size.parse::<u64>().ok())
            .flatten()
            .ok_or_else(malformed)?;

        if filename.is_empty() || filename == "." || filename == ".." || filename.contains('/') {
            return Err(malformed());
        }

        Ok(Self::new(mode, size, filename))
    }
}

/// A duplex byte channel with buffered reads.
pub struct Channel<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R: Read, W: Write> Channel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub fn read_byte(&mut self) -> Result<u8, TransferError> {
        let mut buf = [0u8; 1];
        self.reader
            .read_exact(&mut buf)
            .map_err(TransferError::Channel)?;
        Ok(buf[0])
    }

    /// Reads up to and including `\n`, returning the line without it.
    pub fn read_line(&mut self) -> Result<String, TransferError> {
        let mut line = Vec::new();
        self.reader
            .read_until(b'\n', &mut line)
            .map_err(TransferError::Channel)?;

        if line.pop() != Some(b'\n') {
            return Err(TransferError::Channel(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "channel closed before end of line",
            )));
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Copies exactly `len` bytes from the channel into `out`.
    ///
    /// A channel that ends early is a channel error; a failing `out` is a
    /// local one.
    pub fn read_into(&mut self, len: u64, out: &mut impl Write) -> Result<(), TransferError> {
        let mut remaining = len;
        let mut buf = [0u8; 32 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match self.reader.read(&mut buf[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::Channel(e)),
            };
            if n == 0 {
                return Err(TransferError::Channel(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("channel closed with {remaining} of {len} bytes outstanding"),
                )));
            }
            out.write_all(&buf[..n]).map_err(TransferError::Local)?;
            remaining -= n as u64;
        }
        Ok(())
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .map_err(TransferError::Channel)
    }

    /// Streams exactly `len` bytes from `source` to the channel.
    pub fn send_from(&mut self, len: u64, source: &mut impl Read) -> Result<(), TransferError> {
        let mut remaining = len;
        let mut buf = [0u8; 32 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match source.read(&mut buf[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::Local(e)),
            };
            if n == 0 {
                return Err(TransferError::Truncated {
                    expected: len,
                    actual: len - remaining,
                });
            }
            self.writer
                .write_all(&buf[..n])
                .map_err(TransferError::Channel)?;
            remaining -= n as u64;
        }
        self.writer.flush().map_err(TransferError::Channel)
    }

    pub fn send_ok(&mut self) -> Result<(), TransferError> {
        self.send(&[OK])
    }

    pub fn send_header(&mut self, header: &FileHeader) -> Result<(), TransferError> {
        self.send(format!("{header}\n").as_bytes())
    }

    /// Waits for one acknowledgement byte. Anything but zero is followed by
    /// an error line and becomes [`TransferError::Remote`].
    pub fn expect_ack(&mut self) -> Result<(), TransferError> {
        match self.read_byte()? {
            OK => Ok(()),
            code => Err(self.remote_error(code)),
        }
    }

    /// The error line after a non-zero ack. If the channel closes before
    /// the line ends, that is reported as a channel failure instead.
    fn remote_error(&mut self, code: u8) -> TransferError {
        match self.read_line() {
            Ok(message) => {
                warn!(code, %message, "remote rejected transfer");
                TransferError::Remote { code, message }
            }
            Err(e) => e,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}
