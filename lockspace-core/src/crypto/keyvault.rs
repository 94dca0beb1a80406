//! Per-user key material: derivation, local persistence, and lifecycle.
//!
//! Key scheme: opaque user id (+ optional secret) → PBKDF2 → user key,
//! which encrypts individual secret fields. The raw key bytes are persisted
//! only in the local store and never leave the device; remote requests carry
//! the externally issued bearer token, never key material.

use crate::crypto::kdf::{derive_user_key_with_params, KdfParams};
use crate::storage::KvStore;
use crate::{LockspaceError, Result};
use std::sync::Arc;
use zeroize::ZeroizeOnDrop;

/// Storage namespace for persisted key material.
const KEY_PREFIX: &str = "keyvault/";

/// A 256-bit symmetric user key.
///
/// Kept in memory only while needed; zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct UserKey {
    key: [u8; 32],
}

impl UserKey {
    /// Create a key from raw bytes
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Get a reference to the key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes
        f.write_str("UserKey(..)")
    }
}

/// Key material for one user: created at login, destroyed at logout.
pub struct UserKeyMaterial {
    pub user_id: String,
    pub key: UserKey,
    pub params: KdfParams,
}

/// Derives and persists per-user symmetric keys.
///
/// Persistence is keyed by user id, so distinct users never alias. Stored
/// keys survive process restarts until [`KeyVault::clear_key`] at logout.
pub struct KeyVault {
    store: Arc<dyn KvStore>,
}

impl KeyVault {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Derive the user's key. Deterministic: identical inputs always yield
    /// the identical key.
    pub fn derive_key(&self, user_id: &str, secret: &str) -> Result<UserKeyMaterial> {
        let params = KdfParams::default();
        let key = derive_user_key_with_params(user_id, secret, &params)?;
        Ok(UserKeyMaterial {
            user_id: user_id.to_string(),
            key: UserKey::from_bytes(key),
            params,
        })
    }

    /// Persist key material locally, keyed by user id.
    pub fn store_key(&self, user_id: &str, key: &UserKey) -> Result<()> {
        self.store
            .set(&storage_key(user_id), key.as_bytes().as_slice())?;
        Ok(())
    }

    /// Retrieve previously persisted key material, if any.
    pub fn retrieve_key(&self, user_id: &str) -> Result<Option<UserKey>> {
        let Some(raw) = self.store.get(&storage_key(user_id))? else {
            return Ok(None);
        };
        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            LockspaceError::InvalidInput(format!(
                "Stored key for '{}' has invalid length {}",
                user_id,
                raw.len()
            ))
        })?;
        Ok(Some(UserKey::from_bytes(bytes)))
    }

    /// Erase persisted key material; called on logout.
    pub fn clear_key(&self, user_id: &str) -> Result<()> {
        self.store.remove(&storage_key(user_id))?;
        Ok(())
    }

    /// Retrieve the stored key, deriving and persisting it on first use.
    pub fn load_or_derive(&self, user_id: &str, secret: &str) -> Result<UserKey> {
        if let Some(key) = self.retrieve_key(user_id)? {
            return Ok(key);
        }
        let material = self.derive_key(user_id, secret)?;
        self.store_key(user_id, &material.key)?;
        Ok(material.key)
    }
}

fn storage_key(user_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, user_id)
}
