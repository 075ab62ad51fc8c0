use crate::crypto::{self, DerivedKey, KdfParams, KeyMaterial, SALT_LEN, SENTINEL};
use crate::error::StoreError;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

pub const DEFAULT_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// A saved server. The password is only ever held encrypted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    name: String,
    user: String,
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    encrypted_password: String,
}

impl ServerEntry {
    /// Builds an entry, sealing `secret` under `key`.
    pub fn new(
        name: &str,
        user: &str,
        host: &str,
        port: u16,
        key: &DerivedKey,
        secret: &str,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            name: name.to_string(),
            user: user.to_string(),
            host: host.to_string(),
            port,
            encrypted_password: crypto::encrypt(key, secret)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn encrypted_password(&self) -> &str {
        &self.encrypted_password
    }

    /// `user@host:port`, as shown in listings.
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    pub fn set_user(&mut self, user: &str) {
        self.user = user.to_string();
    }

    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Replaces the stored secret with `secret` sealed under `key`.
    pub fn set_secret(&mut self, key: &DerivedKey, secret: &str) -> Result<(), StoreError> {
        self.encrypted_password = crypto::encrypt(key, secret)?;
        Ok(())
    }

    /// Decrypts this entry's secret. The result is wiped on drop.
    pub fn reveal(&self, key: &DerivedKey) -> Result<Zeroizing<String>, StoreError> {
        crypto::decrypt(key, &self.encrypted_password).map_err(|e| {
            StoreError::DecryptionFailure {
                name: self.name.clone(),
                detail: format!("{e:?}"),
            }
        })
    }

    pub(crate) fn with_encrypted_password(&self, encrypted_password: String) -> Self {
        Self {
            encrypted_password,
            ..self.clone()
        }
    }
}

/// Splits `user@host[:port]`. The port defaults to 22.
pub fn parse_address(address: &str) -> Result<(String, String, u16), StoreError> {
    let invalid = |reason| StoreError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let (user, host_port) = address
        .split_once('@')
        .ok_or_else(|| invalid("expected user@host[:port]"))?;

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| invalid("port must be between 1 and 65535"))?;
            (host, port)
        }
        None => (host_port, DEFAULT_PORT),
    };

    if user.is_empty() || host.is_empty() {
        return Err(invalid("user and host cannot be empty"));
    }
    if user.starts_with('-') || host.starts_with('-') {
        return Err(invalid("user and host cannot start with '-'"));
    }

    Ok((user.to_string(), host.to_string(), port))
}

/// The persisted store: a salt, a verification token, and the ordered list
/// of servers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Store {
    pub(crate) version: u64,
    pub(crate) salt: String,
    pub(crate) verification: String,
    #[serde(default)]
    pub(crate) servers: Vec<ServerEntry>,
    #[serde(default, skip_serializing_if = "KdfParams::is_default")]
    pub(crate) kdf: KdfParams,
}

impl Store {
    /// Creates an empty store keyed by `material`. Version starts at 0 and
    /// nothing is written until [`Store::save`].
    pub fn initialize(material: &KeyMaterial, kdf: KdfParams) -> Result<Self, StoreError> {
        let salt = crypto::generate_salt()?;
        let key = material.derive(&salt, kdf)?;
        let verification = crypto::encrypt(&key, SENTINEL)?;

        Ok(Self {
            version: 0,
            salt: hex::encode(salt),
            verification,
            servers: Vec::new(),
            kdf,
        })
    }

    /// Parses persisted bytes. Only the JSON shape is checked here.
    pub fn load(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::Parse)
    }

    /// Serializes the store as-is, without touching the version.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(self).map_err(StoreError::Serialize)
    }

    /// Bumps the version and writes the whole store to `storage`.
    ///
    /// The in-memory version only advances once the write succeeded.
    pub fn save(&mut self, storage: &Storage) -> Result<(), StoreError> {
        let previous = self.version;
        self.version = previous
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidField {
                field: "version",
                detail: "counter is exhausted".into(),
            })?;

        let result = self
            .to_bytes()
            .and_then(|bytes| storage.save(&bytes).map_err(StoreError::from));

        if result.is_err() {
            self.version = previous;
        } else {
            debug!(version = self.version, "store saved");
        }
        result
    }

    /// Derives the key from `material` and checks it against the
    /// verification token.
    pub fn verify_password(&self, material: &KeyMaterial) -> Result<DerivedKey, StoreError> {
        let salt = self.salt_bytes()?;
        let key = material.derive(&salt, self.kdf)?;
        self.verify_key(&key)?;
        Ok(key)
    }

    /// Checks an already derived key against the verification token.
    pub fn verify_key(&self, key: &DerivedKey) -> Result<(), StoreError> {
        let detail = match crypto::decrypt(key, &self.verification) {
            Ok(plaintext) if plaintext.as_str() == SENTINEL => return Ok(()),
            Ok(_) => "verification token holds an unexpected value".to_string(),
            Err(e) => format!("{e:?}"),
        };

        debug!(%detail, "password verification failed");
        Err(StoreError::WrongPassword { detail })
    }

    pub fn find(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ServerEntry> {
        self.servers.iter_mut().find(|s| s.name == name)
    }

    pub fn add(&mut self, entry: ServerEntry) -> Result<(), StoreError> {
        if self.find(&entry.name).is_some() {
            return Err(StoreError::DuplicateName(entry.name));
        }
        self.servers.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ServerEntry, StoreError> {
        let index = self
            .servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(self.servers.remove(index))
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        if self.find(old).is_none() {
            return Err(StoreError::NotFound(old.to_string()));
        }
        if self.find(new).is_some() {
            return Err(StoreError::DuplicateName(new.to_string()));
        }
        if let Some(entry) = self.find_mut(old) {
            entry.name = new.to_string();
        }
        Ok(())
    }

    pub fn servers(&self) -> &[ServerEntry] {
        &self.servers
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|s| s.name.as_str())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn verification(&self) -> &str {
        &self.verification
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    fn salt_bytes(&self) -> Result<[u8; SALT_LEN], StoreError> {
        let raw = hex::decode(&self.salt).map_err(|e| StoreError::InvalidField {
            field: "salt",
            detail: e.to_string(),
        })?;
        raw.try_into().map_err(|raw: Vec<u8>| StoreError::InvalidField {
            field: "salt",
            detail: format!("expected {SALT_LEN} bytes, got {}", raw.len()),
        })
    }
}
