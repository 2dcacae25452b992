//! HistoryStore - Parking session records (SQLite)
//!
//! ## Responsibilities
//!
//! - One row per parking session: opened on entry, closed on exit
//! - Recent / full history queries for the dashboard
//! - Retention cleanup of closed sessions
//!
//! ## Table
//! - history: id, slot_id, entry_time, exit_time, duration_seconds, fee
//!
//! A slot has at most one open row (`exit_time IS NULL`) at any time.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Persistence seam used by the engine
#[async_trait]
pub trait SessionRecorder: Send + Sync {
    /// Open a session. No-op if one is already open for the slot.
    async fn log_entry(&self, zone_id: u32, at: DateTime<Utc>) -> Result<()>;

    /// Close the open session. Returns the record id, or `None` if none was open.
    async fn log_exit(
        &self,
        zone_id: u32,
        duration_secs: i64,
        fee: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>>;
}

/// Stored session row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub slot_id: i64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub fee: Option<f64>,
}

/// Default row count for `fetch_recent`
pub const DEFAULT_RECENT_LIMIT: i64 = 20;

/// Session history repository
#[derive(Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for the given URL and create the schema.
    ///
    /// In-memory databases are pinned to one connection so every query sees
    /// the same database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::Database(format!("Failed to open {}: {}", database_url, e)))?;

        let repo = Self::new(pool);
        repo.init().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the history table if missing
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slot_id INTEGER NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT,
                duration_seconds INTEGER,
                fee REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        debug!("History table ready");
        Ok(())
    }

    /// Newest sessions first
    pub async fn fetch_recent(&self, limit: i64) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, slot_id, entry_time, exit_time, duration_seconds, fee
            FROM history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows)
    }

    /// Every session, oldest first
    pub async fn fetch_all(&self) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, slot_id, entry_time, exit_time, duration_seconds, fee
            FROM history
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows)
    }

    /// Open session for the slot, if any
    pub async fn open_session(&self, zone_id: u32) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, slot_id, entry_time, exit_time, duration_seconds, fee
            FROM history
            WHERE slot_id = ? AND exit_time IS NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(zone_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row)
    }

    /// Delete every record. Returns the number removed.
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM history")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(deleted = result.rows_affected(), "History cleared");
        Ok(result.rows_affected())
    }

    /// Delete closed sessions whose exit is older than `max_age_secs`
    pub async fn cleanup_completed_older_than(
        &self,
        max_age_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let cutoff = Duration::try_seconds(max_age_secs)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                Error::Validation(format!("Retention of {}s is out of range", max_age_secs))
            })?;
        let result = sqlx::query(
            r#"
            DELETE FROM history
            WHERE exit_time IS NOT NULL AND exit_time < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() > 0 {
            info!(
                deleted = result.rows_affected(),
                cutoff = %cutoff,
                "Old history records removed"
            );
        }
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionRecorder for HistoryRepository {
    async fn log_entry(&self, zone_id: u32, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO history (slot_id, entry_time)
            SELECT ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM history WHERE slot_id = ? AND exit_time IS NULL
            )
            "#,
        )
        .bind(zone_id as i64)
        .bind(at)
        .bind(zone_id as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            debug!(zone_id = zone_id, "Session already open, entry not logged");
        } else {
            debug!(zone_id = zone_id, "Session entry logged");
        }
        Ok(())
    }

    async fn log_exit(
        &self,
        zone_id: u32,
        duration_secs: i64,
        fee: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let Some(open) = self.open_session(zone_id).await? else {
            debug!(zone_id = zone_id, "No open session to close");
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE history
            SET exit_time = ?, duration_seconds = ?, fee = ?
            WHERE id = ?
            "#,
        )
        .bind(at)
        .bind(duration_secs)
        .bind(fee)
        .bind(open.id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        info!(
            record_id = open.id,
            zone_id = zone_id,
            duration_secs = duration_secs,
            fee = fee,
            "Session closed"
        );
        Ok(Some(open.id))
    }
}
