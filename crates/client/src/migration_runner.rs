//! Lightweight migration runner for rusqlite.
//!
//! Migrations are numbered SQL files under `migrations/`, embedded at compile
//! time. Applied versions are tracked in `schema_versions`; pending ones run
//! in order when the cache is opened.

use std::collections::HashSet;

use rusqlite::{params, Connection};
use tracing::info;

/// (version, name, sql)
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_cache_kv",
    include_str!("../migrations/001_cache_kv.sql"),
)];

/// Run all pending migrations. Returns how many were applied.
pub fn run_migrations(conn: &mut Connection) -> Result<usize, rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )?;

    let applied: HashSet<i64> = conn
        .prepare("SELECT version FROM schema_versions")?
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut pending = 0;
    for (version, name, sql) in MIGRATIONS {
        if applied.contains(version) {
            continue;
        }

        // Each migration and its bookkeeping row commit together.
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;

        info!(
            component = "migrations",
            event = "migration.applied",
            version = version,
            name = %name,
            "Applied migration"
        );
        pending += 1;
    }

    info!(
        component = "migrations",
        event = "migrations.complete",
        total = MIGRATIONS.len(),
        applied = pending,
        skipped = MIGRATIONS.len() - pending,
        "Migration check complete"
    );

    Ok(pending)
}
