pub mod config;
pub mod crypto;
pub mod error;
pub mod rotate;
pub mod storage;
pub mod store;
pub mod transfer;
pub mod transport;

pub use crate::crypto::{DerivedKey, KdfParams, KeyMaterial};
pub use crate::error::StoreError;
pub use crate::storage::Storage;
pub use crate::store::{ServerEntry, Store, parse_address};

use anyhow::{Context as _, Result, bail};
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

/// Where the store lives and how it is unlocked.
///
/// Every command builds one of these up front and passes it down; nothing
/// is read from process-wide state after that.
#[derive(Debug, Clone)]
pub struct Context {
    storage: Storage,
    keyfile: Option<PathBuf>,
    kdf: KdfParams,
}

impl Context {
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            storage: Storage::new(store_path),
            keyfile: None,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_keyfile(mut self, keyfile: Option<PathBuf>) -> Self {
        self.keyfile = keyfile;
        self
    }

    /// Parameters used when creating a new store. Existing stores carry
    /// their own.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn store_path(&self) -> &Path {
        self.storage.path()
    }

    pub fn keyfile(&self) -> Option<&Path> {
        self.keyfile.as_deref()
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    /// Pairs `password` with the configured keyfile, if any.
    pub fn key_material(&self, password: Zeroizing<String>) -> Result<KeyMaterial> {
        key_material(password, self.keyfile())
    }

    /// Creates and persists an empty store. Refuses to overwrite one.
    pub fn init(&self, password: Zeroizing<String>) -> Result<Store> {
        if self.storage.exists() {
            bail!(StoreError::AlreadyExists(self.store_path().to_path_buf()));
        }

        let material = self.key_material(password)?;
        let mut store = Store::initialize(&material, self.kdf)?;
        store.save(&self.storage)?;

        info!(path = %self.store_path().display(), "store initialized");
        Ok(store)
    }

    /// Reads the store without unlocking it.
    pub fn load(&self) -> Result<Store> {
        if !self.storage.exists() {
            bail!(StoreError::Missing(self.store_path().to_path_buf()));
        }
        let data = self
            .storage
            .load()
            .with_context(|| format!("failed to read {}", self.store_path().display()))?;
        Ok(Store::load(&data)?)
    }

    /// Verifies `password` (plus keyfile) and returns the store key.
    pub fn unlock(&self, store: &Store, password: Zeroizing<String>) -> Result<DerivedKey> {
        let material = self.key_material(password)?;
        Ok(store.verify_password(&material)?)
    }

    pub fn persist(&self, store: &mut Store) -> Result<()> {
        store.save(&self.storage)?;
        Ok(())
    }

    /// Re-keys an unlocked `store` to `new` and persists the result. On any
    /// failure the file on disk is left as it was.
    pub fn change_password(
        &self,
        store: &Store,
        old_key: &DerivedKey,
        new: &KeyMaterial,
    ) -> Result<Store> {
        let mut rotated = rotate::rotate_with_key(store, old_key, new)?;
        self.persist(&mut rotated)?;
        Ok(rotated)
    }
}

/// Pairs `password` with the contents of `keyfile`, if one is given.
pub fn key_material(password: Zeroizing<String>, keyfile: Option<&Path>) -> Result<KeyMaterial> {
    let keyfile = keyfile
        .map(|path| {
            crypto::load_keyfile(path)
                .with_context(|| format!("failed to read keyfile {}", path.display()))
        })
        .transpose()?;
    Ok(KeyMaterial::new(password, keyfile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::test_params;
    use tempfile::tempdir;

    fn pw(s: &str) -> Zeroizing<String> {
        Zeroizing::new(s.to_string())
    }

    fn context(dir: &Path) -> Context {
        Context::new(dir.join("store.json")).with_kdf(test_params())
    }

    #[test]
    fn init_then_load_and_unlock() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());

        let store = ctx.init(pw("master")).unwrap();
        assert_eq!(store.version(), 1);

        let loaded = ctx.load().unwrap();
        assert_eq!(loaded, store);
        assert!(ctx.unlock(&loaded, pw("master")).is_ok());
    }

    #[test]
    fn init_fails_if_store_exists() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());

        ctx.init(pw("master")).unwrap();
        let err = ctx.init(pw("master")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn load_missing_store_fails() {
        let dir = tempdir().unwrap();
        let err = context(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("nestsh init"));
    }

    #[test]
    fn wrong_password_fails() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let store = ctx.init(pw("correct")).unwrap();

        let err = ctx.unlock(&store, pw("wrong")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::WrongPassword { .. })
        ));
    }

    #[test]
    fn keyfile_is_required_once_configured() {
        let dir = tempdir().unwrap();
        let keyfile = dir.path().join("nestsh.key");
        crypto::generate_keyfile(&keyfile).unwrap();

        let with_key = context(dir.path()).with_keyfile(Some(keyfile));
        let store = with_key.init(pw("master")).unwrap();
        assert!(with_key.unlock(&store, pw("master")).is_ok());

        let without_key = context(dir.path());
        assert!(without_key.unlock(&store, pw("master")).is_err());
    }

    #[test]
    fn missing_keyfile_is_reported() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path()).with_keyfile(Some(dir.path().join("absent.key")));
        let err = ctx.init(pw("master")).unwrap_err();
        assert!(err.to_string().contains("failed to read keyfile"));
        assert!(!ctx.storage().exists());
    }

    #[test]
    fn added_server_survives_reload() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let mut store = ctx.init(pw("master")).unwrap();
        let key = ctx.unlock(&store, pw("master")).unwrap();

        let entry = ServerEntry::new("web", "deploy", "10.0.0.5", 22, &key, "s3cret").unwrap();
        store.add(entry).unwrap();
        ctx.persist(&mut store).unwrap();

        let reloaded = ctx.load().unwrap();
        assert_eq!(reloaded.version(), 2);
        let key = ctx.unlock(&reloaded, pw("master")).unwrap();
        let secret = reloaded.find("web").unwrap().reveal(&key).unwrap();
        assert_eq!(secret.as_str(), "s3cret");
    }

    #[test]
    fn change_password_persists_new_key() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let mut store = ctx.init(pw("old")).unwrap();
        let key = ctx.unlock(&store, pw("old")).unwrap();
        store
            .add(ServerEntry::new("db", "root", "db.local", 2222, &key, "pw1").unwrap())
            .unwrap();
        ctx.persist(&mut store).unwrap();

        let new = ctx.key_material(pw("new")).unwrap();
        ctx.change_password(&store, &key, &new).unwrap();

        let reloaded = ctx.load().unwrap();
        assert!(ctx.unlock(&reloaded, pw("old")).is_err());
        let key = ctx.unlock(&reloaded, pw("new")).unwrap();
        assert_eq!(
            reloaded.find("db").unwrap().reveal(&key).unwrap().as_str(),
            "pw1"
        );
    }

    #[test]
    fn failed_change_password_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let mut store = ctx.init(pw("old")).unwrap();
        let key = ctx.unlock(&store, pw("old")).unwrap();
        store
            .add(ServerEntry::new("db", "root", "db.local", 22, &key, "pw1").unwrap())
            .unwrap();
        store.servers[0] = store.servers[0].with_encrypted_password("00".repeat(40));
        ctx.persist(&mut store).unwrap();
        let before = std::fs::read(ctx.store_path()).unwrap();

        let new = ctx.key_material(pw("new")).unwrap();
        assert!(ctx.change_password(&store, &key, &new).is_err());

        assert_eq!(std::fs::read(ctx.store_path()).unwrap(), before);
    }
}
