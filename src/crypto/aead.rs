use super::{CryptoError, KEY_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use getrandom::fill;
use zeroize::Zeroizing;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    fill(buf).map_err(|_| CryptoError::Random)
}

/// Generate salt
pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

fn cipher(key: &[u8; KEY_LEN]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

/// Encrypts `plaintext` with AES-256-GCM under a fresh random nonce.
///
/// Returns hex of `nonce || ciphertext || tag`.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &str) -> Result<String, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    secure_random(&mut nonce)?;
    seal(key, &nonce, plaintext)
}

fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &str,
) -> Result<String, CryptoError> {
    let ciphertext = cipher(key)
        .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(hex::encode(blob))
}

/// Decrypts a blob produced by [`encrypt`].
///
/// Malformed input and authentication failures are reported identically.
pub fn decrypt(key: &[u8; KEY_LEN], blob: &str) -> Result<Zeroizing<String>, CryptoError> {
    let data = hex::decode(blob).map_err(|_| CryptoError::Decrypt {
        detail: "blob is not valid hex",
    })?;
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decrypt {
            detail: "blob too short",
        });
    }

    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = cipher(key)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt {
            detail: "authentication tag mismatch",
        })?;

    let text = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::Decrypt {
        detail: "plaintext is not utf-8",
    })?;
    Ok(Zeroizing::new(text.to_string()))
}
