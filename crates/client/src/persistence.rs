//! Persistence layer - durable key/value cache
//!
//! Holds the last known session and the device's player identity across
//! restarts. Every operation is fail-silent: storage trouble is logged and
//! degrades to "no cache".

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use boardbank_protocol::now_rfc3339;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::migration_runner::run_migrations;

pub const SESSION_KEY: &str = "cached.session";
pub const PLAYER_KEY: &str = "cached.player";
pub const SAVED_AT_KEY: &str = "cached.player.savedAt";

/// One write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOp {
    Save { key: String, value: String },
    Remove { key: String },
}

impl PersistOp {
    pub fn save(key: &str, value: impl Into<String>) -> Self {
        PersistOp::Save {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn remove(key: &str) -> Self {
        PersistOp::Remove {
            key: key.to_string(),
        }
    }
}

/// Durable string storage keyed by name
pub trait PersistenceAdapter: Send + Sync {
    fn save(&self, key: &str, value: &str);

    fn load(&self, key: &str) -> Option<String>;

    fn remove(&self, key: &str);

    /// Apply `ops` as one unit where the backend supports it.
    fn write_batch(&self, ops: &[PersistOp]) {
        for op in ops {
            match op {
                PersistOp::Save { key, value } => self.save(key, value),
                PersistOp::Remove { key } => self.remove(key),
            }
        }
    }
}

/// SQLite-backed cache in `<data>/cache.db`
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        run_migrations(&mut conn)?;
        debug!(
            component = "persistence",
            event = "persistence.opened",
            path = %path.display(),
            "Opened cache database"
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Option<T> {
        let mut conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        match f(&mut conn) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    component = "persistence",
                    event = "persistence.failed",
                    op = op,
                    error = %e,
                    "Cache operation failed"
                );
                None
            }
        }
    }
}

fn upsert(conn: &Connection, key: &str, value: &str, now: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, value, now],
    )?;
    Ok(())
}

fn delete(conn: &Connection, key: &str) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    Ok(())
}

impl PersistenceAdapter for SqliteStore {
    fn save(&self, key: &str, value: &str) {
        let now = now_rfc3339();
        self.with_conn("save", |conn| upsert(conn, key, value, &now));
    }

    fn load(&self, key: &str) -> Option<String> {
        self.with_conn("load", |conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .flatten()
    }

    fn remove(&self, key: &str) {
        self.with_conn("remove", |conn| delete(conn, key));
    }

    fn write_batch(&self, ops: &[PersistOp]) {
        let now = now_rfc3339();
        let written = self.with_conn("write_batch", |conn| {
            let tx = conn.transaction()?;
            for op in ops {
                match op {
                    PersistOp::Save { key, value } => upsert(&tx, key, value, &now)?,
                    PersistOp::Remove { key } => delete(&tx, key)?,
                }
            }
            tx.commit()?;
            Ok(ops.len())
        });
        if let Some(count) = written {
            debug!(
                component = "persistence",
                event = "persistence.batch.flushed",
                count = count,
                "Flushed cache batch"
            );
        }
    }
}

/// In-process store; the fallback when the database can't be opened and the
/// test double everywhere else.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save`/`remove`/`write_batch` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PersistenceAdapter for MemoryStore {
    fn save(&self, key: &str, value: &str) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries().insert(key.to_string(), value.to_string());
    }

    fn load(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries().remove(key);
    }

    fn write_batch(&self, ops: &[PersistOp]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries();
        for op in ops {
            match op {
                PersistOp::Save { key, value } => {
                    entries.insert(key.clone(), value.clone());
                }
                PersistOp::Remove { key } => {
                    entries.remove(key);
                }
            }
        }
    }
}

/// Open the on-disk cache, falling back to memory when that fails.
pub fn open_or_memory(path: &Path) -> Arc<dyn PersistenceAdapter> {
    match SqliteStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                component = "persistence",
                event = "persistence.open_failed",
                path = %path.display(),
                error = %e,
                "Cache unavailable, continuing without it"
            );
            Arc::new(MemoryStore::new())
        }
    }
}
