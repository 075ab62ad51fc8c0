//! Re-keying: moves every secret in a store under a new password/keyfile.

use tracing::{debug, info};

use crate::crypto::{self, DerivedKey, KeyMaterial, SENTINEL};
use crate::error::StoreError;
use crate::store::Store;

/// Re-encrypts every secret in `store` under a key derived from `new` and a
/// fresh salt.
///
/// Returns the rotated store and leaves `store` untouched, so a failure on
/// any record means nothing changed. The version is carried over; the
/// caller persists the result with [`Store::save`].
pub fn rotate(store: &Store, old: &KeyMaterial, new: &KeyMaterial) -> Result<Store, StoreError> {
    let old_key = store.verify_password(old)?;
    rotate_with_key(store, &old_key, new)
}

/// Like [`rotate`], for a caller that already unlocked `store`. The key is
/// still checked against the verification token.
pub fn rotate_with_key(
    store: &Store,
    old_key: &DerivedKey,
    new: &KeyMaterial,
) -> Result<Store, StoreError> {
    store.verify_key(old_key)?;

    let salt = crypto::generate_salt()?;
    let new_key = new.derive(&salt, store.kdf())?;

    let mut servers = Vec::with_capacity(store.len());
    for entry in store.servers() {
        let secret = entry.reveal(old_key)?;
        let sealed = crypto::encrypt(&new_key, &secret)?;
        debug!(name = entry.name(), "re-encrypted secret");
        servers.push(entry.with_encrypted_password(sealed));
    }

    let verification = crypto::encrypt(&new_key, SENTINEL)?;

    info!(servers = servers.len(), "store re-keyed");
    Ok(Store {
        version: store.version,
        salt: hex::encode(salt),
        verification,
        servers,
        kdf: store.kdf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::test_params;
    use crate::store::ServerEntry;
    use zeroize::Zeroizing;

    fn populated(password: &str) -> Store {
        let material = KeyMaterial::password_only(password);
        let mut store = Store::initialize(&material, test_params()).unwrap();
        let key = store.verify_password(&material).unwrap();
        for (name, secret) in [("a", "alpha"), ("b", "bravo"), ("c", "charlie")] {
            store
                .add(ServerEntry::new(name, "root", "host", 22, &key, secret).unwrap())
                .unwrap();
        }
        store
    }

    #[test]
    fn rotation_moves_all_secrets_to_new_password() {
        let store = populated("old");
        let rotated = rotate(
            &store,
            &KeyMaterial::password_only("old"),
            &KeyMaterial::password_only("new"),
        )
        .unwrap();

        assert!(
            rotated
                .verify_password(&KeyMaterial::password_only("old"))
                .is_err()
        );
        let key = rotated
            .verify_password(&KeyMaterial::password_only("new"))
            .unwrap();
        assert_eq!(rotated.find("b").unwrap().reveal(&key).unwrap().as_str(), "bravo");
        assert_ne!(rotated.salt(), store.salt());
        assert_eq!(rotated.version(), store.version());
        assert_eq!(rotated.names().collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn rotation_can_add_a_keyfile() {
        let store = populated("pw");
        let with_keyfile = KeyMaterial::new(
            Zeroizing::new("pw".to_string()),
            Some(Zeroizing::new(vec![1u8; 32])),
        );

        let rotated = rotate(&store, &KeyMaterial::password_only("pw"), &with_keyfile).unwrap();

        assert!(
            rotated
                .verify_password(&KeyMaterial::password_only("pw"))
                .is_err()
        );
        let key = rotated.verify_password(&with_keyfile).unwrap();
        assert_eq!(rotated.find("c").unwrap().reveal(&key).unwrap().as_str(), "charlie");
    }

    #[test]
    fn wrong_old_password_fails_fast() {
        let store = populated("old");
        let err = rotate(
            &store,
            &KeyMaterial::password_only("nope"),
            &KeyMaterial::password_only("new"),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::WrongPassword { .. }));
    }

    #[test]
    fn rotating_with_unlocked_key() {
        let store = populated("old");
        let key = store
            .verify_password(&KeyMaterial::password_only("old"))
            .unwrap();

        let rotated =
            rotate_with_key(&store, &key, &KeyMaterial::password_only("new")).unwrap();

        let key = rotated
            .verify_password(&KeyMaterial::password_only("new"))
            .unwrap();
        assert_eq!(rotated.find("a").unwrap().reveal(&key).unwrap().as_str(), "alpha");
    }

    #[test]
    fn foreign_key_is_rejected_before_any_work() {
        let store = populated("old");
        let err = rotate_with_key(
            &store,
            &Zeroizing::new([9u8; crate::crypto::KEY_LEN]),
            &KeyMaterial::password_only("new"),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::WrongPassword { .. }));
    }

    #[test]
    fn corrupted_record_aborts_without_changes() {
        let mut store = populated("old");
        store.servers[1] = store.servers[1].with_encrypted_password("00".repeat(40));
        let before = store.clone();

        let err = rotate(
            &store,
            &KeyMaterial::password_only("old"),
            &KeyMaterial::password_only("new"),
        )
        .unwrap_err();

        match err {
            StoreError::DecryptionFailure { name, .. } => assert_eq!(name, "b"),
            other => panic!("expected DecryptionFailure, got: {other:?}"),
        }
        assert_eq!(store, before);
        assert!(
            store
                .verify_password(&KeyMaterial::password_only("old"))
                .is_ok()
        );
    }
}
