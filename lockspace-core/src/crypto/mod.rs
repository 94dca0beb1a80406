//! Cryptographic primitives for the lockspace vault.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 per-user key derivation
//! - AES-256-GCM envelope encryption of secret fields
//! - Local key persistence keyed by user id

pub mod cipher;
pub mod kdf;
pub mod keyvault;

pub use cipher::{
    decrypt_or_placeholder, decrypt_string, encrypt_string, EncryptedBlob, DECRYPT_PLACEHOLDER,
};
pub use kdf::{derive_user_key, KdfParams};
pub use keyvault::{KeyVault, UserKey, UserKeyMaterial};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Fatal: a required primitive is missing or refused the parameters.
    /// There is no fallback to weaker crypto.
    #[error("Required cryptographic primitive unavailable: {0}")]
    Unavailable(String),

    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication tag mismatch: wrong key, corrupted or tampered data.
    #[error("Decryption failed - wrong key or tampered data")]
    DecryptionFailed,

    #[error("Invalid encrypted blob: {0}")]
    InvalidBlob(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
