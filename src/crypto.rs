//! Symmetric encryption of cached passwords.
//!
//! Passwords are sealed with AES-256-GCM under the process secret key. Each
//! call draws a fresh 96-bit nonce which is prepended to the ciphertext, and
//! the whole blob is hex-encoded:
//!
//! ```text
//! hex( nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! Any tampering, truncation, or use of the wrong key fails authentication
//! and surfaces as [`Error::DecryptionFailed`].

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};

use crate::{Error, Result};

/// AES-GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Secret key length in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Generate a new random secret key as 64 lowercase hex characters.
#[must_use]
pub fn generate_key() -> String {
    let bytes: [u8; KEY_SIZE] = rand::random();
    hex::encode(bytes)
}

/// Check that `hex_key` is a 64-character hex string (32 bytes).
pub fn validate_key(hex_key: &str) -> Result<()> {
    decode_key(hex_key).map(|_| ())
}

fn decode_key(hex_key: &str) -> Result<[u8; KEY_SIZE]> {
    if hex_key.is_empty() {
        return Err(Error::Config("secret_key is required".to_string()));
    }
    let bytes = hex::decode(hex_key)
        .map_err(|e| Error::Config(format!("secret_key must be hex-encoded: {e}")))?;
    <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
        Error::Config(format!(
            "secret_key must be {} hex characters ({KEY_SIZE} bytes for AES-256), got {} hex characters",
            KEY_SIZE * 2,
            hex_key.len()
        ))
    })
}

fn cipher(hex_key: &str) -> Result<Aes256Gcm> {
    let key = decode_key(hex_key)?;
    Aes256Gcm::new_from_slice(&key).map_err(|e| Error::Config(format!("invalid key: {e}")))
}

/// Encrypt `plaintext` under `hex_key`, returning `hex(nonce || ciphertext || tag)`.
pub fn encrypt(plaintext: &str, hex_key: &str) -> Result<String> {
    let cipher = cipher(hex_key).map_err(|e| Error::EncryptionFailed(e.to_string()))?;
    let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| Error::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(hex::encode(out))
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Inputs that are not hex, shorter than nonce plus tag, fail authentication,
/// or are not UTF-8 once opened all map to [`Error::DecryptionFailed`].
pub fn decrypt(ciphertext: &str, hex_key: &str) -> Result<String> {
    let cipher = cipher(hex_key).map_err(|_| Error::DecryptionFailed)?;
    let raw = hex::decode(ciphertext).map_err(|_| Error::DecryptionFailed)?;
    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let (nonce, sealed) = raw.split_at(NONCE_SIZE);
    let opened = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::DecryptionFailed)?;

    String::from_utf8(opened).map_err(|_| Error::DecryptionFailed)
}
