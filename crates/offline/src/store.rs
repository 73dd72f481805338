//! Durable local storage shared by the draft store, cache and write queue.
//!
//! One SQLite database holds every table. The pool is opened lazily on first
//! use, so constructing a handle never fails; callers find out about an
//! unusable location when they first touch it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::Mutex;

/// File name of the database inside the data directory.
pub const DB_FILE_NAME: &str = "firespec.db";

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS drafts (
        draft_key TEXT PRIMARY KEY,
        data      TEXT NOT NULL,
        saved_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id        INTEGER PRIMARY KEY,
        data      TEXT NOT NULL,
        cached_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inspections (
        cache_key TEXT PRIMARY KEY,
        data      TEXT NOT NULL,
        cached_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inspection_details (
        id        INTEGER PRIMARY KEY,
        data      TEXT NOT NULL,
        cached_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS offline_queue (
        sequence_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        operation     TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_path TEXT NOT NULL,
        payload       TEXT NOT NULL,
        draft_key     TEXT NULL,
        created_at    TEXT NOT NULL,
        attempts      INTEGER NOT NULL DEFAULT 0,
        last_error    TEXT NULL
    )
    "#,
];

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// On-disk database file; survives restarts.
    File(PathBuf),
    /// Private in-memory database; lost when the last handle is dropped.
    Memory,
}

/// Handle to the local database. Cheap to clone; clones share one pool.
#[derive(Debug, Clone)]
pub struct LocalStore {
    location: StoreLocation,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl LocalStore {
    /// Create a handle (lazy initialization).
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    /// Database file inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::at_path(data_dir.join(DB_FILE_NAME))
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Get the pool, opening the database and creating tables if necessary.
    pub(crate) async fn pool(&self) -> anyhow::Result<SqlitePool> {
        let mut pool_guard = self.pool.lock().await;
        if let Some(pool) = pool_guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self.open().await?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("failed to create local storage schema")?;
        }

        *pool_guard = Some(pool.clone());
        Ok(pool)
    }

    async fn open(&self) -> anyhow::Result<SqlitePool> {
        match &self.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create storage directory at {parent:?}")
                    })?;
                }

                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal);

                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .with_context(|| format!("failed to open local storage at {path:?}"))
            }
            StoreLocation::Memory => {
                let options = SqliteConnectOptions::from_str("sqlite::memory:")
                    .context("invalid in-memory SQLite options")?;

                // A single connection that never expires: every connection to
                // `:memory:` is its own database.
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None::<Duration>)
                    .max_lifetime(None::<Duration>)
                    .connect_with(options)
                    .await
                    .context("failed to open in-memory local storage")
            }
        }
    }
}

/// Default data directory: `{os data dir}/firespec`.
pub fn default_data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    Ok(base.join("firespec"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_file_store_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::at_path(dir.path().join("nested").join(DB_FILE_NAME));

        let pool = store.pool().await.unwrap();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'offline_queue'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert!(dir.path().join("nested").join(DB_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn unusable_location_reports_an_error_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = LocalStore::at_path(blocker.join(DB_FILE_NAME));

        assert!(store.pool().await.is_err());
        assert!(store.pool().await.is_err());
    }

    #[tokio::test]
    async fn clones_share_the_in_memory_database() {
        let store = LocalStore::in_memory();
        let other = store.clone();

        let pool = store.pool().await.unwrap();
        sqlx::query("INSERT INTO drafts (draft_key, data, saved_at) VALUES ('k', '{}', 'now')")
            .execute(&pool)
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM drafts")
            .fetch_one(&other.pool().await.unwrap())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
