//! Persistent key-value backends for the cache and preferences.
//!
//! The persistent tier is a plain string store with a byte quota. Writes that
//! would push it past the quota fail with [`StoreError::QuotaExceeded`] so the
//! caller can evict and retry.

use std::collections::HashMap;
use std::path::Path;

use nimbus_core::RusqliteErrorExt;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

/// String key-value store scoped to one installation.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Approximate bytes used by keys and values.
    fn estimated_size(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for key in self.keys()? {
            let value_len = self.get(&key)?.map(|v| v.len()).unwrap_or(0);
            total += (key.len() + value_len) as u64;
        }
        Ok(total)
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    quota_bytes: u64,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, quota_bytes: u64) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::from(e.into_database_error()))?;
        let store = Self {
            conn: Mutex::new(conn),
            quota_bytes,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store.
    pub fn in_memory(quota_bytes: u64) -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::from(e.into_database_error()))?;
        let store = Self {
            conn: Mutex::new(conn),
            quota_bytes,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )
            .map_err(db_err)
    }

    fn used_bytes(conn: &Connection) -> Result<u64, StoreError> {
        let used: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM kv",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(used.max(0) as u64)
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.into_database_error())
}

impl PersistentStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        let existing: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        let freed = existing.map(|v| entry_size(key, &v)).unwrap_or(0);
        let projected = Self::used_bytes(&conn)?.saturating_sub(freed) + entry_size(key, value);
        if projected > self.quota_bytes {
            return Err(StoreError::QuotaExceeded);
        }

        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute_batch("DELETE FROM kv;")
            .map_err(db_err)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key").map_err(db_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(db_err)
    }

    fn estimated_size(&self) -> Result<u64, StoreError> {
        Self::used_bytes(&self.conn.lock())
    }
}

/// In-process store with the same quota semantics as [`SqliteStore`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: u64,
}

impl MemoryStore {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes,
        }
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let used: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
        let freed = entries.get(key).map(|v| entry_size(key, v)).unwrap_or(0);
        if used.saturating_sub(freed) + entry_size(key, value) > self.quota_bytes {
            return Err(StoreError::QuotaExceeded);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn PersistentStore) {
        assert!(store.get("missing").unwrap().is_none());

        store.set("a", "one").unwrap();
        store.set("b", "two").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("one"));
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.estimated_size().unwrap(), 8);

        store.set("a", "uno").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("uno"));

        store.remove("a").unwrap();
        assert!(store.get("a").unwrap().is_none());

        store.clear().unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_store_basic_operations() {
        let store = SqliteStore::in_memory(1024).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryStore::new(1024);
        exercise(&store);
    }

    #[test]
    fn test_quota_exceeded_is_distinguishable() {
        let stores: Vec<Box<dyn PersistentStore>> = vec![
            Box::new(SqliteStore::in_memory(10).unwrap()),
            Box::new(MemoryStore::new(10)),
        ];
        for store in stores {
            store.set("k", "12345").unwrap();
            let err = store.set("big", "1234567890").unwrap_err();
            assert!(matches!(err, StoreError::QuotaExceeded));
            assert!(store.get("big").unwrap().is_none());

            // Replacing an entry only counts the size difference
            store.set("k", "123456789").unwrap();
        }
    }

    #[test]
    fn test_sqlite_store_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteStore::open(&path, 1024).unwrap();
            store.set("unit", "celsius").unwrap();
        }
        let reopened = SqliteStore::open(&path, 1024).unwrap();
        assert_eq!(reopened.get("unit").unwrap().as_deref(), Some("celsius"));
    }
}
