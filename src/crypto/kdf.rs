use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use super::{CryptoError, KEY_LEN};

/// A derived 256-bit key. Wiped from memory on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    mem_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024, // 64 MiB
            time_cost: 1,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    pub fn new(mem_cost_kib: u32, time_cost: u32, parallelism: u32) -> Result<Self, CryptoError> {
        let params = Self {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn mem_cost_kib(&self) -> u32 {
        self.mem_cost_kib
    }

    pub fn time_cost(&self) -> u32 {
        self.time_cost
    }

    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.time_cost < 1 {
            return Err(CryptoError::Kdf("argon2 time cost must be >= 1".into()));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::Kdf("argon2 parallelism must be >= 1".into()));
        }
        if self.mem_cost_kib < 8 * self.parallelism {
            return Err(CryptoError::Kdf(
                "argon2 memory cost must be at least 8 * parallelism".into(),
            ));
        }
        Ok(())
    }
}

/// The factors a key is derived from: a password and, optionally, the raw
/// contents of a keyfile.
pub struct KeyMaterial {
    password: Zeroizing<String>,
    keyfile: Option<Zeroizing<Vec<u8>>>,
}

impl KeyMaterial {
    pub fn new(password: Zeroizing<String>, keyfile: Option<Zeroizing<Vec<u8>>>) -> Self {
        Self { password, keyfile }
    }

    pub fn password_only(password: &str) -> Self {
        Self::new(Zeroizing::new(password.to_string()), None)
    }

    pub fn has_keyfile(&self) -> bool {
        self.keyfile.is_some()
    }

    pub fn derive(&self, salt: &[u8], kdf: KdfParams) -> Result<DerivedKey, CryptoError> {
        derive_key(
            &self.password,
            salt,
            self.keyfile.as_ref().map(|k| k.as_slice()),
            kdf,
        )
    }
}

/// Derives a key with Argon2id.
///
/// Keyfile bytes, when present, are appended to the password bytes before
/// hashing, so both factors are needed to reproduce the key.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    keyfile: Option<&[u8]>,
    kdf: KdfParams,
) -> Result<DerivedKey, CryptoError> {
    kdf.validate()?;

    let params = Params::new(
        kdf.mem_cost_kib,
        kdf.time_cost,
        kdf.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::Kdf(format!("failed to construct Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut input = Zeroizing::new(Vec::with_capacity(
        password.len() + keyfile.map_or(0, <[u8]>::len),
    ));
    input.extend_from_slice(password.as_bytes());
    if let Some(extra) = keyfile {
        input.extend_from_slice(extra);
    }

    debug!(
        mem_cost_kib = kdf.mem_cost_kib,
        time_cost = kdf.time_cost,
        parallelism = kdf.parallelism,
        keyfile = keyfile.is_some(),
        "deriving key"
    );

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(&input, salt, &mut key[..])
        .map_err(|e| CryptoError::Kdf(format!("argon2 key derivation failed: {e}")))?;

    Ok(key)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        mem_cost_kib: 64,
        time_cost: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic() {
        let salt = [42u8; 16];

        let k1 = derive_key("password", &salt, None, test_params()).unwrap();
        let k2 = derive_key("password", &salt, None, test_params()).unwrap();

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn default_params_match_interactive_profile() {
        let kdf = KdfParams::default();
        assert_eq!(kdf.mem_cost_kib(), 65536);
        assert_eq!(kdf.time_cost(), 1);
        assert_eq!(kdf.parallelism(), 4);
        assert!(kdf.is_default());
    }

    #[test]
    fn kdf_params_affect_output() {
        let salt = [7u8; 16];
        let other = KdfParams::new(128, 1, 1).unwrap();

        let k1 = derive_key("pw", &salt, None, test_params()).unwrap();
        let k2 = derive_key("pw", &salt, None, other).unwrap();

        assert_ne!(*k1, *k2);
    }

    #[test]
    fn keyfile_changes_the_key() {
        let salt = [1u8; 16];

        let plain = derive_key("pw", &salt, None, test_params()).unwrap();
        let with_keyfile = derive_key("pw", &salt, Some(&[9u8; 32][..]), test_params()).unwrap();

        assert_ne!(*plain, *with_keyfile);
    }

    #[test]
    fn keyfile_is_appended_to_password() {
        let salt = [3u8; 16];

        let split = derive_key("pass", &salt, Some(&b"word"[..]), test_params()).unwrap();
        let joined = derive_key("password", &salt, None, test_params()).unwrap();

        assert_eq!(*split, *joined);
    }

    #[test]
    fn key_material_matches_free_function() {
        let salt = [5u8; 16];
        let material = KeyMaterial::new(
            Zeroizing::new("pw".to_string()),
            Some(Zeroizing::new(vec![1, 2, 3])),
        );

        let a = material.derive(&salt, test_params()).unwrap();
        let b = derive_key("pw", &salt, Some(&[1, 2, 3][..]), test_params()).unwrap();

        assert!(material.has_keyfile());
        assert_eq!(*a, *b);
    }

    #[test]
    fn kdf_invalid_params_fail_gracefully() {
        assert!(KdfParams::new(0, 0, 0).is_err());
        assert!(KdfParams::new(16, 1, 4).is_err());
    }

    #[test]
    fn short_salt_is_rejected() {
        assert!(derive_key("pw", &[1, 2], None, test_params()).is_err());
    }
}
