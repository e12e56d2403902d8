use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::StorageError;
use crate::model::ScanResult;
use crate::outcome::{BatchReport, OutcomeKey};
use crate::store::{OutcomeStore, StateStore};

const BACKFILL_KEY: &str = "backfill_completed";
const SCAN_KEY: &str = "latest_scan";

pub async fn connect(url: &str) -> Result<SqlitePool, StorageError> {
    let in_memory = url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // every connection to :memory: is its own database, so keep exactly one alive
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new().max_connections(5).connect_with(options).await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(url, "database connected and migrations applied");
    Ok(pool)
}

/// State and outcome records in SQLite.
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqlStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM engine_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO engine_state (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl StateStore for SqlStore {
    async fn backfill_completed(&self) -> Result<bool, StorageError> {
        Ok(self.get_state(BACKFILL_KEY).await?.as_deref() == Some("1"))
    }

    async fn mark_backfill_completed(&self) -> Result<(), StorageError> {
        self.set_state(BACKFILL_KEY, "1").await
    }

    async fn save_scan(&self, scan: &ScanResult) -> Result<(), StorageError> {
        self.set_state(SCAN_KEY, &serde_json::to_string(scan)?).await
    }

    async fn load_scan(&self) -> Result<Option<ScanResult>, StorageError> {
        match self.get_state(SCAN_KEY).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OutcomeStore for SqlStore {
    async fn put(&self, key: OutcomeKey, report: &BatchReport) -> Result<(), StorageError> {
        let now = now_ms();
        let expires_at = now + i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX - now);
        let body = serde_json::to_string(report)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM outcomes WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO outcomes (key, body, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, expires_at = excluded.expires_at",
        )
        .bind(key.to_string())
        .bind(body)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn take(&self, key: OutcomeKey) -> Result<Option<BatchReport>, StorageError> {
        let key = key.to_string();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, (String, i64)>("SELECT body, expires_at FROM outcomes WHERE key = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM outcomes WHERE key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        match row {
            Some((body, expires_at)) if expires_at > now_ms() => Ok(Some(serde_json::from_str(&body)?)),
            _ => Ok(None),
        }
    }
}
