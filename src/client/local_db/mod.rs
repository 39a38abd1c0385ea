//! # Local Storage Module
//!
//! Durable key/value persistence for the client. The sync queue, sync
//! metadata and legacy local snapshots all live here so they survive a
//! process restart.
//!
//! ## Architecture
//!
//! - **`LocalStorage`**: async trait over namespaced string keys and JSON values
//! - **`SqliteStorage`**: SQLite-backed implementation (WAL mode, schema migrations)
//! - **`MemoryStorage`**: in-process implementation for tests and ephemeral sessions
//!
//! ## Usage
//!
//! ```rust,no_run
//! use piggybank_sync::client::local_db::{self, SqliteStorage};
//!
//! # async fn example() -> piggybank_sync::shared::Result<()> {
//! let storage = SqliteStorage::open(SqliteStorage::default_path()).await?;
//! local_db::write_json(&storage, "sync:example", &vec![1, 2, 3]).await?;
//! let value: Option<Vec<i32>> = local_db::read_json(&storage, "sync:example").await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::shared::error::{Result, SyncError};

/// Key holding the time of the last successful full sync
pub const LAST_SYNC_TIME_KEY: &str = "sync:last_sync_time";

/// Namespaced key/value persistence
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value, absent keys are ignored
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read and decode a JSON value
pub async fn read_json<T: DeserializeOwned>(storage: &dyn LocalStorage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn write_json<T: Serialize + ?Sized>(storage: &dyn LocalStorage, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    storage.set(key, &raw).await
}

/// Time of the last successful full sync
pub async fn last_sync_time(storage: &dyn LocalStorage) -> Result<Option<DateTime<Utc>>> {
    read_json(storage, LAST_SYNC_TIME_KEY).await
}

/// Record a successful full sync
pub async fn set_last_sync_time(storage: &dyn LocalStorage, time: DateTime<Utc>) -> Result<()> {
    write_json(storage, LAST_SYNC_TIME_KEY, &time).await
}

/// SQLite-backed local storage
///
/// Uses WAL mode so readers never block the queue flushes.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open or create the database file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA temp_store=MEMORY").execute(&pool).await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        tracing::debug!("[LocalDb] Opened {}", path.display());
        Ok(storage)
    }

    /// Private in-memory database, lost when dropped
    pub async fn in_memory() -> Result<Self> {
        // one connection, otherwise each pooled connection gets its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Platform data directory location of the database file
    pub fn default_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("piggybank");
        path.push("local.db");
        path
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(&self.pool).await?;
        self.run_migrations().await
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current_version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;

        if current_version < 1 {
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (1, ?)")
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Applied schema version
    pub async fn schema_version(&self) -> Result<i64> {
        let version = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }
}

#[async_trait]
impl LocalStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM kv_store WHERE instr(key, ?) = 1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}
