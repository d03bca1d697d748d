//! Durable store for the Paperdrop ingestor.
//!
//! One local SQLite file holds both tables: the delivery job queue and the
//! seen-file index. It is the only coordination point between the watcher
//! and the worker; every operation is a single transaction. Any storage
//! error is propagated to the caller - a job can only leave the store
//! through an explicit `complete`.

pub mod queue;
pub mod seen;

pub use queue::{JobQueue, NewJob, QueuedJob};
pub use seen::SeenIndex;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;

/// Open (creating if missing) the store database and initialize its schema.
///
/// WAL journaling lets the watcher commit enqueues while the worker holds a
/// read, and the busy timeout absorbs the write-lock handoff between them.
pub async fn open(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open store database {}", db_path.display()))?;
    initialize_tables(&pool).await?;
    Ok(pool)
}

/// Open an in-memory store. Used by tests.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory store")?;
    initialize_tables(&pool).await?;
    Ok(pool)
}

async fn initialize_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            content_hash TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            not_before INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create jobs table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_not_before
        ON jobs(not_before, id)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create jobs index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seen_files (
            content_hash TEXT PRIMARY KEY,
            filename TEXT,
            first_seen_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create seen_files table")?;

    Ok(())
}
