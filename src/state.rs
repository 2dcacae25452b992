//! Application state
//!
//! Holds all shared components and state

use crate::booking_service::BookingService;
use crate::history_store::HistoryRepository;
use crate::receipt_generator::FileReceiptGenerator;
use crate::slot_layout::SlotLayoutStore;
use crate::tick_orchestrator::{EngineSettings, ParkingEngine};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Detection service endpoint (frames are rejected when unset)
    pub detector_url: Option<String>,
    /// Telegram credentials; alerts are only logged when either is missing
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Receipt output directory
    pub receipt_dir: PathBuf,
    /// Saved slot layouts
    pub slot_layout_file: PathBuf,
    /// Notification worker count
    pub notify_workers: usize,
    /// Notification queue capacity
    pub notify_queue_capacity: usize,
    /// Session event queue capacity
    pub persist_queue_capacity: usize,
    /// Closed sessions older than this are deleted (disabled when unset)
    pub history_retention_secs: Option<i64>,
    /// Receipts older than this are deleted (disabled when unset)
    pub receipt_retention_secs: Option<u64>,
    /// Initial engine settings
    pub engine: EngineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let defaults = EngineSettings::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://parking_history.db?mode=rwc".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 10000),
            detector_url: std::env::var("DETECTOR_URL").ok(),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
            receipt_dir: std::env::var("RECEIPT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("receipts")),
            slot_layout_file: std::env::var("SLOT_LAYOUT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("parking_layouts.json")),
            notify_workers: env_or("NOTIFY_WORKERS", 2),
            notify_queue_capacity: env_or("NOTIFY_QUEUE_CAPACITY", 256),
            persist_queue_capacity: env_or("PERSIST_QUEUE_CAPACITY", 1024),
            history_retention_secs: env_opt("HISTORY_RETENTION_SECS"),
            receipt_retention_secs: env_opt("RECEIPT_RETENTION_SECS"),
            engine: EngineSettings {
                overstay_threshold_secs: env_or(
                    "OVERSTAY_THRESHOLD_SECS",
                    defaults.overstay_threshold_secs,
                ),
                hourly_rate: env_or("HOURLY_RATE", defaults.hourly_rate),
                assign_threshold: env_or("ASSIGN_THRESHOLD", defaults.assign_threshold),
                fill_threshold: env_or("FILL_THRESHOLD", defaults.fill_threshold),
                alert_cooldown_secs: env_or("ALERT_COOLDOWN_SECS", defaults.alert_cooldown_secs),
                reservation_window_secs: env_or(
                    "RESERVATION_WINDOW_SECS",
                    defaults.reservation_window_secs,
                ),
            },
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Parking engine (single writer)
    pub engine: Arc<ParkingEngine>,
    /// Session history (SQLite)
    pub history: HistoryRepository,
    /// Receipt files
    pub receipts: Arc<FileReceiptGenerator>,
    /// Saved layouts per source
    pub layouts: Arc<SlotLayoutStore>,
    /// Customer bookings
    pub bookings: Arc<BookingService>,
    /// Process start, for uptime
    pub started_at: Instant,
}
