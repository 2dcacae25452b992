//! ReceiptGenerator - Per-session payment receipts
//!
//! ## Responsibilities
//!
//! - Write one JSON receipt per closed session
//! - Read a receipt back by history record id
//! - Prune receipt files past their retention age
//!
//! Receipts are only requested after the history store confirmed the exit.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Receipt seam used by the engine
#[async_trait]
pub trait ReceiptGenerator: Send + Sync {
    async fn generate(&self, receipt: &Receipt) -> Result<PathBuf>;
}

/// Closed-session receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub record_id: i64,
    /// Printable id, `#000042`
    pub transaction_id: String,
    pub slot_id: u32,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub duration_seconds: i64,
    /// `"1h 2m 3s"`
    pub duration: String,
    /// Rounded to cents
    pub total_paid: f64,
}

impl Receipt {
    pub fn new(
        record_id: i64,
        slot_id: u32,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        duration_seconds: i64,
        fee: f64,
    ) -> Self {
        Self {
            record_id,
            transaction_id: format!("#{:06}", record_id),
            slot_id,
            entry_time,
            exit_time,
            duration_seconds,
            duration: format_duration(duration_seconds),
            total_paid: (fee * 100.0).round() / 100.0,
        }
    }

    pub fn file_name(&self) -> String {
        file_name(self.record_id)
    }
}

fn file_name(record_id: i64) -> String {
    format!("receipt_{}.json", record_id)
}

/// `3725` -> `"1h 2m 5s"`
pub fn format_duration(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Writes receipts as JSON files into a directory
pub struct FileReceiptGenerator {
    dir: PathBuf,
}

impl FileReceiptGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Receipt written for the history record
    pub async fn read(&self, record_id: i64) -> Result<Receipt> {
        let path = self.dir.join(file_name(record_id));
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Receipt {} not found", record_id)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&body)?)
    }

    /// Delete receipt files not modified within `max_age`
    pub async fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_receipt = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("receipt_") && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_receipt {
                continue;
            }

            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove old receipt")
                    }
                }
            }
        }

        if removed > 0 {
            info!(removed = removed, "Old receipts pruned");
        }
        Ok(removed)
    }
}

#[async_trait]
impl ReceiptGenerator for FileReceiptGenerator {
    async fn generate(&self, receipt: &Receipt) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(receipt.file_name());
        let body = serde_json::to_vec_pretty(receipt)?;
        tokio::fs::write(&path, body).await?;

        debug!(record_id = receipt.record_id, path = %path.display(), "Receipt written");
        Ok(path)
    }
}
