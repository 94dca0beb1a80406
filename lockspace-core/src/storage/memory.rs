//! In-memory [`KvStore`] for tests and ephemeral contexts.

use crate::storage::{KvStore, Result, StorageError};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

/// Non-persistent store backed by a sorted map. Contents do not survive the
/// process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned("memory store".to_string()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.lock()?;
        Ok(entries
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));

        store.set("a", b"2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"2".to_vec()));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_prefix_enumeration_is_sorted() {
        let store = MemoryStore::new();
        store.set("queue/003", b"c").unwrap();
        store.set("queue/001", b"a").unwrap();
        store.set("queue/002", b"b").unwrap();
        store.set("cache/x", b"x").unwrap();

        assert_eq!(
            store.keys_with_prefix("queue/").unwrap(),
            vec!["queue/001", "queue/002", "queue/003"]
        );
    }

    #[test]
    fn test_remove_prefix() {
        let store = MemoryStore::new();
        store.set("cache/a", b"1").unwrap();
        store.set("cache/b", b"2").unwrap();
        store.set("keyvault/u", b"3").unwrap();

        store.remove_prefix("cache/").unwrap();
        assert!(store.keys_with_prefix("cache/").unwrap().is_empty());
        assert_eq!(store.get("keyvault/u").unwrap(), Some(b"3".to_vec()));
    }
}
