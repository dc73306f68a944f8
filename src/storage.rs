//! # Local Key/Value Storage
//!
//! Durable state is small: one key for the seen notification ids and one for
//! the user settings, each holding a JSON document.
//!
//! - [`MemoryStore`]: process-lifetime map, used by tests and hosts that
//!   persist elsewhere.
//! - [`SqliteStore`]: single-table SQLite file that survives restarts
//!   (feature `persistence`).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, SyncError};

/// Key holding the JSON array of seen notification ids.
pub const SEEN_IDS_KEY: &str = "seen_notification_ids";

/// Key holding the JSON-encoded user settings object.
pub const SETTINGS_KEY: &str = "app_settings";

/// Durable string storage keyed by name.
///
/// Implementations must make `set` visible to every later `get`, including
/// from a fresh instance opened on the same backing file.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

fn lock_poisoned<T>(_: T) -> SyncError {
    SyncError::persistence("store lock poisoned")
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(lock_poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(lock_poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

#[cfg(feature = "persistence")]
pub use sqlite::SqliteStore;

#[cfg(feature = "persistence")]
mod sqlite {
    use std::sync::Mutex;

    use log::info;
    use rusqlite::{params, Connection, OptionalExtension};

    use super::{lock_poisoned, KeyValueStore};
    use crate::error::Result;

    /// Key/value store backed by a single SQLite table.
    pub struct SqliteStore {
        db: Mutex<Connection>,
    }

    impl SqliteStore {
        /// Open (or create) the database at `db_path`.
        pub fn new(db_path: &str) -> Result<Self> {
            let db = Connection::open(db_path)?;
            Self::init_schema(&db)?;
            info!("[SqliteStore] Opened {}", db_path);

            Ok(Self {
                db: Mutex::new(db),
            })
        }

        /// Create an in-memory database (for testing).
        pub fn in_memory() -> Result<Self> {
            Self::new(":memory:")
        }

        fn init_schema(conn: &Connection) -> Result<()> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
                );
                "#,
            )?;
            Ok(())
        }
    }

    impl KeyValueStore for SqliteStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            let db = self.db.lock().map_err(lock_poisoned)?;
            let value = db
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            let db = self.db.lock().map_err(lock_poisoned)?;
            db.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?, ?, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )?;
            Ok(())
        }
    }
}
