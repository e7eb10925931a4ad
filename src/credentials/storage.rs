//! Persistence adapters for the credential slot.
//!
//! The manager talks to a small typed key/value contract ([`Storage`]). Two
//! backends ship with the crate: [`SqliteStorage`] for durable use and
//! [`MemoryStorage`] for tests and ephemeral processes.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// A typed value held under one storage key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredValue {
    String(String),
    Long(i64),
    Bool(bool),
}

impl StoredValue {
    fn kind(&self) -> &'static str {
        match self {
            StoredValue::String(_) => "string",
            StoredValue::Long(_) => "long",
            StoredValue::Bool(_) => "bool",
        }
    }
}

/// Byte-oriented persistence contract required by the manager.
///
/// Reading a key that holds a value of another type is an error, not `None`.
/// Backends that can write several keys atomically should override
/// [`Storage::store_all`] and [`Storage::remove_all`].
pub trait Storage: Send + Sync {
    fn store(&self, key: &str, value: StoredValue) -> Result<()>;

    fn retrieve(&self, key: &str) -> Result<Option<StoredValue>>;

    fn remove(&self, key: &str) -> Result<()>;

    fn retrieve_string(&self, key: &str) -> Result<Option<String>> {
        match self.retrieve(key)? {
            None => Ok(None),
            Some(StoredValue::String(s)) => Ok(Some(s)),
            Some(other) => bail!("Key '{}' holds a {}, expected string", key, other.kind()),
        }
    }

    fn retrieve_long(&self, key: &str) -> Result<Option<i64>> {
        match self.retrieve(key)? {
            None => Ok(None),
            Some(StoredValue::Long(n)) => Ok(Some(n)),
            Some(other) => bail!("Key '{}' holds a {}, expected long", key, other.kind()),
        }
    }

    fn retrieve_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.retrieve(key)? {
            None => Ok(None),
            Some(StoredValue::Bool(b)) => Ok(Some(b)),
            Some(other) => bail!("Key '{}' holds a {}, expected bool", key, other.kind()),
        }
    }

    fn store_all(&self, entries: &[(&str, StoredValue)]) -> Result<()> {
        for (key, value) in entries {
            self.store(key, value.clone())?;
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Key/value storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE entries (
///     key TEXT PRIMARY KEY,
///     kind TEXT NOT NULL,        -- "string" | "long" | "bool"
///     value TEXT NOT NULL,
///     updated_at TEXT NOT NULL   -- ISO 8601 timestamp
/// );
/// ```
///
/// Batch writes and removals run inside one transaction, so the encrypted blob
/// and its plaintext mirrors change together or not at all.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates or opens a storage file.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for a private in-memory db)
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create entries table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn upsert(conn: &Connection, key: &str, value: &StoredValue) -> Result<()> {
        let encoded = match value {
            StoredValue::String(s) => s.clone(),
            StoredValue::Long(n) => n.to_string(),
            StoredValue::Bool(b) => b.to_string(),
        };

        conn.execute(
            r#"
            INSERT INTO entries (key, kind, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind,
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value.kind(), encoded, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to store key '{}'", key))?;

        Ok(())
    }

    fn decode(key: &str, kind: &str, raw: String) -> Result<StoredValue> {
        let value = match kind {
            "string" => StoredValue::String(raw),
            "long" => StoredValue::Long(
                raw.parse()
                    .with_context(|| format!("Corrupted long value under '{}'", key))?,
            ),
            "bool" => StoredValue::Bool(
                raw.parse()
                    .with_context(|| format!("Corrupted bool value under '{}'", key))?,
            ),
            other => bail!("Unknown value kind '{}' under '{}'", other, key),
        };
        Ok(value)
    }
}

impl Storage for SqliteStorage {
    fn store(&self, key: &str, value: StoredValue) -> Result<()> {
        let conn = self.lock()?;
        Self::upsert(&conn, key, &value)
    }

    fn retrieve(&self, key: &str) -> Result<Option<StoredValue>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT kind, value FROM entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .with_context(|| format!("Failed to read key '{}'", key))?;

        row.map(|(kind, raw)| Self::decode(key, &kind, raw)).transpose()
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM entries WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to remove key '{}'", key))?;
        Ok(())
    }

    fn store_all(&self, entries: &[(&str, StoredValue)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for (key, value) in entries {
            Self::upsert(&tx, key, value)?;
        }
        tx.commit().context("Failed to commit entries")?;
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for key in keys {
            tx.execute("DELETE FROM entries WHERE key = ?1", params![key])
                .with_context(|| format!("Failed to remove key '{}'", key))?;
        }
        tx.commit().context("Failed to commit removal")?;
        Ok(())
    }
}

/// In-process storage. Contents are lost when the value is dropped.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredValue>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("Memory storage lock poisoned"))
    }
}

impl Storage for MemoryStorage {
    fn store(&self, key: &str, value: StoredValue) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn store_all(&self, entries: &[(&str, StoredValue)]) -> Result<()> {
        let mut map = self.lock()?;
        for (key, value) in entries {
            map.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut map = self.lock()?;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteStorage {
        SqliteStorage::new(":memory:").expect("Failed to create test store")
    }

    #[test]
    fn test_store_and_retrieve_each_type() {
        let store = create_test_store();

        store.store("blob", StoredValue::String("c2VjcmV0".to_string())).unwrap();
        store.store("expires", StoredValue::Long(1_700_000_000_000)).unwrap();
        store.store("can_refresh", StoredValue::Bool(true)).unwrap();

        assert_eq!(store.retrieve_string("blob").unwrap().as_deref(), Some("c2VjcmV0"));
        assert_eq!(store.retrieve_long("expires").unwrap(), Some(1_700_000_000_000));
        assert_eq!(store.retrieve_bool("can_refresh").unwrap(), Some(true));
    }

    #[test]
    fn test_missing_key_is_none() {
        let store = create_test_store();

        assert!(store.retrieve_string("missing").unwrap().is_none());
        assert!(store.retrieve_long("missing").unwrap().is_none());
        assert!(store.retrieve_bool("missing").unwrap().is_none());
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let store = create_test_store();
        store.store("expires", StoredValue::String("soon".to_string())).unwrap();

        assert!(store.retrieve_long("expires").is_err());
    }

    #[test]
    fn test_overwrite_replaces_value_and_kind() {
        let store = create_test_store();

        store.store("k", StoredValue::Long(1)).unwrap();
        store.store("k", StoredValue::Bool(false)).unwrap();

        assert_eq!(store.retrieve("k").unwrap(), Some(StoredValue::Bool(false)));
    }

    #[test]
    fn test_batch_store_and_remove() {
        let store = create_test_store();

        store
            .store_all(&[
                ("a", StoredValue::String("x".to_string())),
                ("b", StoredValue::Long(2)),
                ("c", StoredValue::Bool(true)),
            ])
            .unwrap();
        assert_eq!(store.retrieve_long("b").unwrap(), Some(2));

        store.remove_all(&["a", "b", "c", "never-written"]).unwrap();
        assert!(store.retrieve("a").unwrap().is_none());
        assert!(store.retrieve("b").unwrap().is_none());
        assert!(store.retrieve("c").unwrap().is_none());

        // Idempotent
        store.remove_all(&["a", "b", "c"]).unwrap();
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteStorage::new(&path).unwrap();
            store.store("k", StoredValue::Long(42)).unwrap();
        }

        let store = SqliteStorage::new(&path).unwrap();
        assert_eq!(store.retrieve_long("k").unwrap(), Some(42));
    }

    #[test]
    fn test_memory_storage() {
        let store = MemoryStorage::new();
        assert!(store.is_empty());

        store
            .store_all(&[("a", StoredValue::Long(1)), ("b", StoredValue::Bool(false))])
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.retrieve_bool("b").unwrap(), Some(false));

        store.remove("a").unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.retrieve_bool("a").is_ok());
        assert!(store.retrieve_string("b").is_err());
    }
}
