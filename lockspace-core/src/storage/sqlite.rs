//! SQLite-backed [`KvStore`]: the durable tier that outlives process
//! restarts.

use crate::storage::{KvStore, Result, StorageError};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// Persistent store over a single `kv` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned("sqlite store".to_string()))
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let pattern = format!("{}%", escape_like(prefix));
        let mut stmt =
            conn.prepare("SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")?;
        let keys = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn remove_prefix(&self, prefix: &str) -> Result<()> {
        let conn = self.lock()?;
        let pattern = format!("{}%", escape_like(prefix));
        conn.execute("DELETE FROM kv WHERE key LIKE ?1 ESCAPE '\\'", [pattern])?;
        Ok(())
    }
}

/// Escape LIKE wildcards so prefixes containing `%`, `_` or `\` match
/// literally.
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if c == '%' || c == '_' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));

        store.set("a", b"2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"2".to_vec()));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_prefix_enumeration_is_sorted() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("queue/002", b"b").unwrap();
        store.set("queue/001", b"a").unwrap();
        store.set("other/x", b"x").unwrap();

        assert_eq!(
            store.keys_with_prefix("queue/").unwrap(),
            vec!["queue/001", "queue/002"]
        );
    }

    #[test]
    fn test_remove_prefix_spares_other_namespaces() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("cache/passwords/all", b"1").unwrap();
        store.set("cache/bills/all", b"2").unwrap();
        store.set("keyvault/u", b"3").unwrap();

        store.remove_prefix("cache/passwords").unwrap();
        assert_eq!(store.get("cache/passwords/all").unwrap(), None);
        assert!(store.get("cache/bills/all").unwrap().is_some());
        assert!(store.get("keyvault/u").unwrap().is_some());
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("a%b/1", b"1").unwrap();
        store.set("axb/2", b"2").unwrap();

        assert_eq!(store.keys_with_prefix("a%b").unwrap(), vec!["a%b/1"]);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("persist", b"yes").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("persist").unwrap(), Some(b"yes".to_vec()));
    }
}
