//! SQLite storage for tally.
//!
//! [`SqliteStore`] implements both collaborator traits of `tally-core`: the
//! whole [`TrackerConfig`] aggregate is kept as one JSON document, and small
//! values such as the auto-pause marker live in a key-value table.
//!
//! # Schema
//!
//! - `config`: a single row (`id = 1`) holding the aggregate as JSON, a
//!   revision counter bumped by every save, and the time it was last written.
//! - `kv`: `key TEXT PRIMARY KEY`, `value TEXT` (JSON).
//!
//! Timestamps are stored as RFC 3339 text in UTC with millisecond precision.
//!
//! # Thread Safety
//!
//! The connection sits behind a `Mutex`, and clones share it. One clone can be
//! handed to the tracker as persistence and another as its key-value store.
//!
//! Separate processes may open the same file. Saves compare the stored
//! revision inside an `IMMEDIATE` transaction, so a writer holding a stale
//! copy gets [`DbError::Conflict`] instead of overwriting newer data.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use tally_core::{KeyValueStore, Persistence, StoreError, StoredConfig, TrackerConfig};

/// How long a connection waits for another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored document is not valid JSON for its type.
    #[error("invalid stored data for {what}: {source}")]
    InvalidData {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    /// The connection lock was poisoned by a panicking holder.
    #[error("database lock poisoned")]
    LockPoisoned,
    /// The config row was saved by someone else since it was read.
    #[error("config revision is {found}, expected {expected}")]
    Conflict { expected: u64, found: u64 },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::LockPoisoned => Self::LockPoisoned,
            DbError::Conflict { expected, found } => Self::Conflict { expected, found },
            other => Self::backend("sqlite store", other),
        }
    }
}

/// SQLite-backed tracker storage.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema is initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database. It is destroyed with the last clone.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Creates the tables. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Loads the saved aggregate, if any.
    pub fn load_config(&self) -> Result<Option<StoredConfig>, DbError> {
        let row: Option<(String, i64)> = self
            .lock()?
            .query_row("SELECT data, revision FROM config WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        row.map(|(data, revision)| {
            let config = serde_json::from_str(&data).map_err(|source| DbError::InvalidData {
                what: "config".to_string(),
                source,
            })?;
            Ok(StoredConfig {
                config,
                revision: u64::try_from(revision).unwrap_or_default(),
            })
        })
        .transpose()
    }

    /// Revision of the saved aggregate; 0 before the first save.
    pub fn config_revision(&self) -> Result<u64, DbError> {
        let conn = self.lock()?;
        read_revision(&conn)
    }

    /// Replaces the saved aggregate if its revision is still `expected`.
    ///
    /// Returns the new revision.
    pub fn save_config(&self, config: &TrackerConfig, expected: u64) -> Result<u64, DbError> {
        let data = serde_json::to_string(config).map_err(|source| DbError::InvalidData {
            what: "config".to_string(),
            source,
        })?;
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let found = read_revision(&tx)?;
        if found != expected {
            return Err(DbError::Conflict { expected, found });
        }
        let revision = found + 1;
        tx.execute(
            "INSERT INTO config (id, data, revision, updated_at) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                revision = excluded.revision,
                updated_at = excluded.updated_at",
            params![data, i64::try_from(revision).unwrap_or(i64::MAX), updated_at],
        )?;
        tx.commit()?;
        tracing::trace!(bytes = data.len(), revision, "saved config");
        Ok(revision)
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>, DbError> {
        let raw: Option<String> = self
            .lock()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| DbError::InvalidData {
                what: format!("key {key}"),
                source,
            })
        })
        .transpose()
    }

    pub fn set_value(&self, key: &str, value: &Value) -> Result<(), DbError> {
        self.lock()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value.to_string()],
        )?;
        Ok(())
    }

    pub fn remove_value(&self, key: &str) -> Result<(), DbError> {
        self.lock()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn read_revision(conn: &Connection) -> Result<u64, DbError> {
    let revision: Option<i64> = conn
        .query_row("SELECT revision FROM config WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    Ok(revision.and_then(|r| u64::try_from(r).ok()).unwrap_or_default())
}

impl Persistence for SqliteStore {
    fn load(&self) -> Result<Option<StoredConfig>, StoreError> {
        Ok(self.load_config()?)
    }

    fn revision(&self) -> Result<u64, StoreError> {
        Ok(self.config_revision()?)
    }

    fn save(&mut self, config: &TrackerConfig, expected: u64) -> Result<u64, StoreError> {
        Ok(self.save_config(config, expected)?)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_value(key)?)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        Ok(self.set_value(key, &value)?)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        Ok(self.remove_value(key)?)
    }
}
