//! Whole-file persistence for the store and the config file.
//!
//! Writes never touch the target in place: the bytes go to a private
//! sibling temp file, which is synced and then swapped over the target.
//! A crash leaves either the old file or the new one.

use getrandom::fill;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// Replaces the file with `data`, creating parent directories as
    /// needed. On Unix the file ends up with mode 0600.
    ///
    /// On error the previous content is still in place. A failed sync of
    /// the directory after the swap is logged, not returned.
    pub fn save(&self, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.sibling_tmp_path()?;
        let staged = write_private(&tmp_path, data).and_then(|()| self.swap_in(&tmp_path));
        if let Err(e) = staged {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // the new content is in place from here on
        if let Err(e) = self.sync_parent() {
            warn!(path = %self.path.display(), error = %e, "could not sync directory after save");
        }

        Ok(())
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> io::Result<()> {
        match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => fs::File::open(parent)?.sync_all(),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> io::Result<()> {
        Ok(())
    }

    /// `<name>.tmp.<16 hex chars>` next to the target, so the final rename
    /// stays on one filesystem.
    fn sibling_tmp_path(&self) -> io::Result<PathBuf> {
        let file_name = self.path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file path", self.path.display()),
            )
        })?;

        let mut suffix = [0u8; 8];
        fill(&mut suffix).map_err(|e| io::Error::other(e.to_string()))?;

        let tmp_name = format!("{}.tmp.{}", file_name.to_string_lossy(), hex::encode(suffix));
        Ok(self.path.with_file_name(tmp_name))
    }

    #[cfg(target_os = "windows")]
    fn swap_in(&self, tmp_path: &Path) -> io::Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        fn wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        // ReplaceFileW needs an existing target
        if !self.path.exists() {
            return fs::rename(tmp_path, &self.path);
        }

        let target = wide(self.path.as_os_str());
        let replacement = wide(tmp_path.as_os_str());

        // SAFETY: both buffers are NUL-terminated UTF-16 that outlive the
        // call, and the optional arguments are null.
        let ok = unsafe {
            ReplaceFileW(
                target.as_ptr(),
                replacement.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };

        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "windows"))]
    fn swap_in(&self, tmp_path: &Path) -> io::Result<()> {
        fs::rename(tmp_path, &self.path)
    }
}

/// Creates `path` (which must not exist yet), writes `data` and syncs it.
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("store.json"));
        assert!(!storage.exists());

        storage.save(br#"{"version":1}"#).unwrap();

        assert!(storage.exists());
        assert_eq!(storage.load().unwrap(), br#"{"version":1}"#);
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("missing.json"));
        assert_eq!(
            storage.load().unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn save_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("store.json"));

        storage.save(&vec![b'a'; 10_000]).unwrap();
        storage.save(b"short").unwrap();

        assert_eq!(storage.load().unwrap(), b"short");
        assert_eq!(listing(dir.path()), ["store.json"]);
    }

    #[test]
    fn tmp_path_is_a_fresh_sibling() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let storage = Storage::new(path.clone());

        let a = storage.sibling_tmp_path().unwrap();
        let b = storage.sibling_tmp_path().unwrap();

        assert_eq!(a.parent(), path.parent());
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("store.json.tmp.")
        );
        assert_ne!(a, b);
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        let storage = Storage::new(PathBuf::from("/"));
        assert!(storage.sibling_tmp_path().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        Storage::new(path.clone()).save(b"{}").unwrap();

        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn failed_save_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("store.json"));
        storage.save(b"old").unwrap();

        // parent is a regular file, so the directory cannot be created
        let bogus = Storage::new(dir.path().join("store.json").join("child"));
        assert!(bogus.save(b"new").is_err());

        assert_eq!(storage.load().unwrap(), b"old");
        assert_eq!(listing(dir.path()), ["store.json"]);
    }

    #[test]
    fn parent_directories_are_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("store.json");

        Storage::new(nested.clone()).save(b"{}").unwrap();

        assert!(nested.exists());
    }
}
