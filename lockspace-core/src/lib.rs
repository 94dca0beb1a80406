//! Lockspace Core Library
//!
//! This library provides the client-side core for the Lockspace password/TOTP
//! manager: envelope encryption of secrets, one-time-password generation, and
//! an offline-resilient synchronization engine (two-tier TTL cache, optimistic
//! mutations with rollback, durable offline replay queue).

pub mod cache;
pub mod clock;
pub mod coordinator;
pub mod crypto;
pub mod queue;
pub mod records;
pub mod remote;
pub mod storage;
pub mod totp;

pub use cache::{cache_key, SyncCache};
pub use clock::{Clock, SystemClock};
pub use coordinator::MutationCoordinator;
pub use crypto::{
    decrypt_or_placeholder, decrypt_string, derive_user_key, encrypt_string, CryptoError,
    EncryptedBlob, KdfParams, KeyVault, UserKey,
};
pub use queue::{OfflineQueue, OpKind, QueuedOperation, ReplayExecutor, ReplayReport};
pub use records::{Bill, OtpRecord, PasswordRecord, Record, Space};
pub use remote::{RemoteClient, RemoteCollection, RemoteError};
pub use storage::{KvStore, MemoryStore, SqliteStore};
pub use totp::{
    current_code, generate_code, parse_otpauth_uri, seconds_remaining, OtpError, OtpParameters,
    TotpAlgorithm, TotpCode,
};

use thiserror::Error;

/// Result type for lockspace core operations
pub type Result<T> = std::result::Result<T, LockspaceError>;

/// General error type for lockspace core operations
#[derive(Error, Debug)]
pub enum LockspaceError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("OTP error: {0}")]
    Otp(#[from] totp::OtpError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] remote::RemoteError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockspaceError {
    /// Whether this error is a transient network failure that the offline
    /// queue can retry later. Crypto and validation errors are never
    /// transient: retrying with the same input cannot succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LockspaceError::Remote(e) if e.is_transient())
    }
}
