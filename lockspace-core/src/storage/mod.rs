//! Structured key-value persistence.
//!
//! Everything the core persists (key material, the durable cache tier, the
//! offline queue) goes through the [`KvStore`] trait, so invalidation by
//! prefix is a first-class operation rather than string-matching over raw
//! key enumeration.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Errors from the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// A string-keyed store of opaque byte values.
///
/// Implementations must return keys from [`KvStore::keys_with_prefix`] in
/// ascending lexicographic order; the offline queue relies on that for FIFO
/// replay.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every entry whose key starts with `prefix`.
    fn remove_prefix(&self, prefix: &str) -> Result<()> {
        for key in self.keys_with_prefix(prefix)? {
            self.remove(&key)?;
        }
        Ok(())
    }
}
