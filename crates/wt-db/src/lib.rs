//! Storage layer for the web time tracker.
//!
//! Provides a persistent [`KeyValueStore`] backed by `rusqlite`.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`. [`Database`] keeps its
//! connection behind a shared mutex; clones use the same connection. Separate
//! processes coordinate through SQLite's own file locking, and a busy timeout
//! makes short contention wait instead of failing.
//!
//! The `*_items` methods block. The [`KeyValueStore`] implementation runs them
//! on tokio's blocking pool, so a busy database never stalls the async workers.
//!
//! # Schema
//!
//! A single `kv` table maps a storage key to a JSON-encoded value:
//!
//! - `"YYYY-MM-DD"` → `{"<attribution key>": <ms>, ...}`
//! - `"limits"` → `{"<domain>": <minutes>}`
//! - `"blocking"` → `{"<domain>": <bool>}`
//! - `"filterMode"` → `"all" | "include" | "exclude"`
//! - `"filterList"` → `["<domain>", ...]`
//!
//! Values are stored as JSON text, so integers round-trip exactly.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use wt_core::store::{Items, KeyValueStore, StoreError};

/// How long a write waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored value is not valid JSON.
    #[error("invalid stored value for key {key}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Decode { key, source } => Self::Codec { key, source },
            other @ DbError::Sqlite(_) => Self::Backend(Box::new(other)),
        }
    }
}

/// SQLite-backed key-value store.
///
/// See the [module documentation](self) for the schema.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init()?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the values stored under `keys`. Missing keys are omitted.
    pub fn get_items<K: AsRef<str>>(&self, keys: &[K]) -> Result<Items, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?")?;
        let mut items = Items::new();
        for key in keys.iter().map(AsRef::as_ref) {
            let raw: Option<String> = stmt
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            if let Some(raw) = raw {
                items.insert(key.to_string(), decode(key, &raw)?);
            }
        }
        Ok(items)
    }

    /// Reads every stored item.
    pub fn all_items(&self) -> Result<Items, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM kv ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut items = Items::new();
        for row in rows {
            let (key, raw) = row?;
            let value = decode(&key, &raw)?;
            items.insert(key, value);
        }
        Ok(items)
    }

    /// Writes `items` in one transaction, replacing existing values.
    pub fn set_items(&self, items: &Items) -> Result<usize, DbError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO kv (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
            )?;
            for (key, value) in items {
                written += stmt.execute(params![key, value.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Deletes `keys`, returning how many existed.
    pub fn remove_items<K: AsRef<str>>(&self, keys: &[K]) -> Result<usize, DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?")?;
            for key in keys {
                removed += stmt.execute(params![key.as_ref()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Deletes everything.
    pub fn clear_items(&self) -> Result<usize, DbError> {
        Ok(self.conn().execute("DELETE FROM kv", [])?)
    }

    /// Runs a blocking operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, DbError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|err| StoreError::Backend(Box::new(err)))?
            .map_err(StoreError::from)
    }
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

fn decode(key: &str, raw: &str) -> Result<Value, DbError> {
    serde_json::from_str(raw).map_err(|source| DbError::Decode {
        key: key.to_string(),
        source,
    })
}

impl KeyValueStore for Database {
    async fn get(&self, keys: &[&str]) -> Result<Items, StoreError> {
        let keys = owned(keys);
        self.blocking(move |db| db.get_items(&keys)).await
    }

    async fn get_all(&self) -> Result<Items, StoreError> {
        self.blocking(Self::all_items).await
    }

    async fn set(&self, items: Items) -> Result<(), StoreError> {
        self.blocking(move |db| db.set_items(&items)).await?;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let keys = owned(keys);
        self.blocking(move |db| db.remove_items(&keys)).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let removed = self.blocking(Self::clear_items).await?;
        tracing::info!(removed, "cleared store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use serde_json::json;
    use wt_core::ledger::Ledger;
    use wt_core::types::AttributionKey;

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");
        assert_eq!(table_columns(&db.conn(), "kv"), vec!["key", "value"]);
    }

    #[test]
    fn init_is_idempotent() {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.set_items(&Items::from([("limits".to_string(), json!({"a.com": 5}))]))
            .unwrap();
        db.init().unwrap();
        assert_eq!(db.all_items().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn integer_round_trips_exactly() {
        let db = Database::open_in_memory().unwrap();
        db.set(Items::from([("2025-01-15".to_string(), json!({"x.com": 5000}))]))
            .await
            .unwrap();

        let items = db.get(&["2025-01-15"]).await.unwrap();
        assert_eq!(items["2025-01-15"]["x.com"].as_i64(), Some(5000));
    }

    #[tokio::test]
    async fn missing_keys_are_absent() {
        let db = Database::open_in_memory().unwrap();
        db.set(Items::from([("filterMode".to_string(), json!("exclude"))]))
            .await
            .unwrap();

        let items = db.get(&["filterMode", "filterList"]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items["filterMode"], json!("exclude"));
    }

    #[tokio::test]
    async fn set_merges_and_overwrites() {
        let db = Database::open_in_memory().unwrap();
        db.set(Items::from([
            ("limits".to_string(), json!({"a.com": 10})),
            ("blocking".to_string(), json!({"a.com": true})),
        ]))
        .await
        .unwrap();
        db.set(Items::from([("limits".to_string(), json!({"a.com": 20}))]))
            .await
            .unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all["limits"], json!({"a.com": 20}));
        assert_eq!(all["blocking"], json!({"a.com": true}));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let db = Database::open_in_memory().unwrap();
        db.set(Items::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
            ("c".to_string(), json!(3)),
        ]))
        .await
        .unwrap();

        assert_eq!(db.remove_items(&["a", "missing"]).unwrap(), 1);
        assert_eq!(db.get_all().await.unwrap().len(), 2);

        db.clear().await.unwrap();
        assert!(db.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_value_surfaces_as_codec_error() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute("INSERT INTO kv (key, value) VALUES ('limits', '{not json')", [])
            .unwrap();

        let err = db.get(&["limits"]).await.unwrap_err();
        assert!(matches!(err, StoreError::Codec { ref key, .. } if key == "limits"));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wt.db");
        {
            let db = Database::open(&path).unwrap();
            db.set(Items::from([("filterList".to_string(), json!(["a.com", "b.com"]))]))
                .await
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let items = db.get(&["filterList"]).await.unwrap();
        assert_eq!(items["filterList"], json!(["a.com", "b.com"]));
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn busy_connection_does_not_stall_the_runtime() {
        let db = Database::open_in_memory().unwrap();
        db.set_items(&Items::from([("limits".to_string(), json!({"a.com": 5}))]))
            .unwrap();

        let held = db.conn();
        let reader = tokio::spawn({
            let db = db.clone();
            async move { db.get(&["limits"]).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        drop(held);
        let items = reader.await.unwrap().unwrap();
        assert_eq!(items["limits"], json!({"a.com": 5}));
    }

    #[tokio::test]
    async fn ledger_accumulates_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("wt.db")).unwrap());
        let ledger = Ledger::new(Arc::clone(&db));
        let other = ledger.clone();
        let key = AttributionKey::new("example.com").unwrap();

        let (a, b) = tokio::join!(
            ledger.add("2025-01-15", &key, 60_000),
            other.add("2025-01-15", &key, 1_500),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(ledger.total("2025-01-15", &key).await.unwrap(), 61_500);
    }
}
