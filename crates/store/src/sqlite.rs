//! SQLite store.
//!
//! Two tables:
//! - `users`: one row per known user with an admin flag
//! - `requests`: append-only log of admitted chat requests
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that
//! lexicographic comparison in SQL matches chronological order.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use deepsearch_core::error::StoreError;
use deepsearch_core::identity::{UserDirectory, UserIdentity};
use deepsearch_core::quota::{QuotaStore, RequestRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// A durable store backed by a single SQLite file.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` and `"sqlite::memory:"` give an ephemeral database held by
    /// a single connection.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        if !in_memory {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        StoreError::Storage(format!("Failed to create {}: {e}", parent.display()))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let mut pool_options = SqlitePoolOptions::new().max_connections(4);
        if in_memory {
            // Every connection to :memory: is a separate database.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id        TEXT PRIMARY KEY NOT NULL,
                is_admin  INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("users table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("requests table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_requests_user_created ON requests(user_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("requests index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Append a record with an explicit timestamp.
    pub async fn record_request_at(
        &self,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<RequestRecord, StoreError> {
        sqlx::query("INSERT INTO requests (user_id, created_at) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(encode_timestamp(timestamp))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("INSERT request failed: {e}")))?;

        Ok(RequestRecord {
            user_id: user_id.to_string(),
            timestamp,
        })
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserIdentity>, StoreError> {
        let row = sqlx::query("SELECT id, is_admin FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("find_user: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let is_admin: i64 = row
            .try_get("is_admin")
            .map_err(|e| StoreError::QueryFailed(format!("is_admin column: {e}")))?;
        Ok(Some(UserIdentity {
            id,
            is_admin: is_admin != 0,
        }))
    }

    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, is_admin) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET is_admin = excluded.is_admin
            "#,
        )
        .bind(&user.id)
        .bind(i64::from(user.is_admin))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT user failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for SqliteStore {
    async fn count_requests_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM requests WHERE user_id = ?1 AND created_at >= ?2",
        )
        .bind(user_id)
        .bind(encode_timestamp(since))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("count_requests_since: {e}")))?;

        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::QueryFailed(format!("count column: {e}")))?;
        Ok(n.max(0) as u64)
    }

    async fn record_request(&self, user_id: &str) -> Result<RequestRecord, StoreError> {
        self.record_request_at(user_id, Utc::now()).await
    }
}
