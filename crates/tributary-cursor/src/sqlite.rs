//! Relational cursor store
//!
//! One row per key in `cursor_records`. Atomic operations map onto
//! conflict-aware SQL: `ON CONFLICT DO NOTHING` for put-if-absent and a
//! value-guarded `UPDATE` for replace.
//!
//! File databases run in WAL mode so `tributaryd cursor get` can read while
//! the daemon writes.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use tributary_core::ports::ICursorStore;

use crate::CursorError;

const SCHEMA: &str = include_str!("migrations/20260301_cursor_records.sql");

/// SQLite-backed cursor store
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Opens the database at `path`, creating the file and its parent
    /// directory when missing
    pub async fn open(path: &Path) -> Result<Self, CursorError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CursorError::ConnectionFailed(format!("{}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CursorError::ConnectionFailed(format!("{}: {e}", path.display())))?;

        let store = Self::with_schema(pool).await?;
        tracing::info!(path = %path.display(), "Cursor database ready");
        Ok(store)
    }

    /// Single-connection in-memory database; each connection would see its own
    pub async fn in_memory() -> Result<Self, CursorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_schema(pool).await
    }

    async fn with_schema(pool: SqlitePool) -> Result<Self, CursorError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CursorError::MigrationFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Number of stored records
    pub async fn count(&self) -> anyhow::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cursor_records")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Waits for open connections to finish and closes the database
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl ICursorStore for SqliteCursorStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT metadata_value FROM cursor_records WHERE metadata_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(r.try_get("metadata_value")?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO cursor_records (metadata_key, metadata_value, updated_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT (metadata_key) DO UPDATE SET \
             metadata_value = excluded.metadata_value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(key, value, "Stored cursor record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            "DELETE FROM cursor_records WHERE metadata_key = ? RETURNING metadata_value",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(r.try_get("metadata_value")?)),
            None => Ok(None),
        }
    }

    fn supports_compare_and_set(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn put_if_absent(&self, key: &str, value: &str) -> anyhow::Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO cursor_records (metadata_key, metadata_value, updated_at) \
             VALUES (?, ?, ?) ON CONFLICT (metadata_key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let existing = if inserted == 1 {
            None
        } else {
            let row =
                sqlx::query("SELECT metadata_value FROM cursor_records WHERE metadata_key = ?")
                    .bind(key)
                    .fetch_one(&mut *tx)
                    .await?;
            Some(row.try_get("metadata_value")?)
        };

        tx.commit().await?;
        Ok(existing)
    }

    #[instrument(skip(self))]
    async fn replace(&self, key: &str, expected: &str, value: &str) -> anyhow::Result<bool> {
        let updated = sqlx::query(
            "UPDATE cursor_records SET metadata_value = ?, updated_at = ? \
             WHERE metadata_key = ? AND metadata_value = ?",
        )
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .bind(key)
        .bind(expected)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}
