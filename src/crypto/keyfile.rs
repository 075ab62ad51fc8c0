//! Keyfiles: a second factor mixed into key derivation.
//!
//! Losing the keyfile makes every secret in the store unrecoverable, even
//! with the right password.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use zeroize::Zeroizing;

use super::KEYFILE_LEN;
use super::aead::secure_random;

/// Writes a fresh random keyfile to `path`. Fails if the file already exists.
pub fn generate_keyfile(path: &Path) -> io::Result<()> {
    let mut data = Zeroizing::new([0u8; KEYFILE_LEN]);
    secure_random(&mut data[..]).map_err(io::Error::other)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(&data[..])?;
    file.sync_all()
}

/// Reads a keyfile's raw bytes.
pub fn load_keyfile(path: &Path) -> io::Result<Zeroizing<Vec<u8>>> {
    let data = Zeroizing::new(std::fs::read(path)?);
    if data.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("keyfile {} is empty", path.display()),
        ));
    }
    Ok(data)
}
