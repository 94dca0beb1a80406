//! PBKDF2-HMAC-SHA256 key derivation for per-user vault keys.
//!
//! Parameters:
//! - 100,000 iterations
//! - Salt: fixed prefix `lockspace/v1:` followed by the user id
//! - Output length: 32 bytes (256 bits)
//!
//! Derivation is deterministic: the same user id and secret always yield the
//! same key, so a returning user regains access to previously encrypted data
//! without any stored derivation state.

use crate::crypto::{CryptoError, Result};
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Default PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Fixed salt prefix, versioned so a future parameter change can re-derive
/// under a distinct namespace.
pub const SALT_PREFIX: &str = "lockspace/v1:";

/// Parameters for PBKDF2 key derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Iteration count (minimum 100,000)
    pub iterations: u32,

    /// Output length in bytes
    pub output_length: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: KDF_ITERATIONS,
            output_length: 32,
        }
    }
}

impl KdfParams {
    /// Verify that parameters are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.iterations < KDF_ITERATIONS {
            return Err(CryptoError::KdfFailed(format!(
                "Iteration count too low (minimum: {})",
                KDF_ITERATIONS
            )));
        }
        if self.output_length < 32 {
            return Err(CryptoError::KdfFailed(
                "Output length too short (minimum: 32 bytes)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Derive a 256-bit symmetric key for a user.
///
/// The salt is `SALT_PREFIX || user_id`, so distinct users never share a key
/// even with an empty secret. The optional secret strengthens derivation when
/// the caller has one (e.g. an unlock passphrase); it may be empty.
pub fn derive_user_key(user_id: &str, secret: &str) -> Result<[u8; 32]> {
    derive_user_key_with_params(user_id, secret, &KdfParams::default())
}

/// Derive a key with explicit parameters.
pub fn derive_user_key_with_params(
    user_id: &str,
    secret: &str,
    params: &KdfParams,
) -> Result<[u8; 32]> {
    params.validate()?;

    if user_id.is_empty() {
        return Err(CryptoError::KdfFailed(
            "User id cannot be empty".to_string(),
        ));
    }

    let salt = format!("{}{}", SALT_PREFIX, user_id);
    let mut key = [0u8; 32];

    pbkdf2::pbkdf2::<Hmac<Sha256>>(secret.as_bytes(), salt.as_bytes(), params.iterations, &mut key)
        .map_err(|_| CryptoError::Unavailable("PBKDF2-HMAC-SHA256".to_string()))?;

    Ok(key)
}
