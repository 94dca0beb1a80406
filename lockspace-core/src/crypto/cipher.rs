//! AES-256-GCM encryption and decryption of secret fields.
//!
//! Wire format: base64(nonce || ciphertext || auth tag) with
//! - 256-bit key
//! - 96-bit (12 byte) nonce, freshly random per encryption
//! - 128-bit (16 byte) authentication tag
//!
//! Secret fields are encrypted with this format before they reach the cache
//! or the remote service.

use crate::crypto::keyvault::UserKey;
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};

/// Nonce length in bytes (96 bits)
const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes (128 bits)
const TAG_LEN: usize = 16;

/// Marker substituted for fields that fail to decrypt, so a single corrupted
/// field does not abort the whole view.
pub const DECRYPT_PLACEHOLDER: &str = "[decryption failed]";

/// An encrypted secret: base64(nonce || ciphertext || auth tag).
///
/// Stateless value type. Produced by [`encrypt_string`] and consumed by
/// [`decrypt_string`]; safe to persist or send to the remote service as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBlob(String);

impl EncryptedBlob {
    /// Wrap an already-encoded blob, e.g. one read back from storage.
    pub fn from_encoded(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encrypt a string with AES-256-GCM.
///
/// A fresh random nonce is generated per call, so two encryptions of the
/// same plaintext under the same key never produce the same blob.
pub fn encrypt_string(key: &UserKey, plaintext: &str) -> Result<EncryptedBlob> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // aes-gcm appends the auth tag to the ciphertext
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);

    use base64::Engine;
    Ok(EncryptedBlob(
        base64::engine::general_purpose::STANDARD.encode(raw),
    ))
}

/// Decrypt a blob produced by [`encrypt_string`].
///
/// Tag mismatch is a hard failure: wrong key, truncation, or any flipped
/// byte yields [`CryptoError::DecryptionFailed`], never silent garbage.
pub fn decrypt_string(key: &UserKey, blob: &EncryptedBlob) -> Result<String> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(blob.as_str())
        .map_err(|e| CryptoError::InvalidBlob(format!("Invalid base64: {}", e)))?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidBlob(
            "Blob too short - missing nonce or auth tag".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::InvalidBlob("Plaintext is not valid UTF-8".to_string()))
}

/// Decrypt a blob, substituting a visible failure marker on any error.
///
/// For UI callers rendering many fields: one undecryptable field shows
/// [`DECRYPT_PLACEHOLDER`] instead of failing the whole view.
pub fn decrypt_or_placeholder(key: &UserKey, blob: &EncryptedBlob) -> String {
    match decrypt_string(key, blob) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!("Field decryption failed: {}", e);
            DECRYPT_PLACEHOLDER.to_string()
        }
    }
}
