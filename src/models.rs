//! Shared models and types
//!
//! Types shared across multiple modules to avoid circular dependencies.

use crate::frame_classifier::SlotStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub slot_count: usize,
    pub ticks: u64,
}

/// Per-slot line of the published snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDetail {
    pub id: u32,
    pub status: SlotStatus,
    /// Seconds since the session started (0 when free)
    #[serde(rename = "duration")]
    pub duration_secs: i64,
    /// Fee accrued so far, unrounded
    pub fee: f64,
    pub is_overstay: bool,
    pub is_reserved: bool,
    /// Seconds left on a timed reservation (0 when none)
    #[serde(rename = "reserved_remaining")]
    pub reserved_remaining_secs: i64,
}

/// Immutable result of one processing cycle.
///
/// Published whole; readers never observe a half-built snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub total: usize,
    pub free: usize,
    pub filled: usize,
    pub wrong: usize,
    /// Sum of fees accruing on currently occupied slots
    pub revenue: f64,
    pub detailed: Vec<SlotDetail>,
    /// Cycle counter (0 before the first tick)
    pub tick: u64,
    pub generated_at: DateTime<Utc>,
}

impl OccupancySnapshot {
    /// Snapshot for a layout that has not been processed yet
    pub fn empty(slot_ids: impl IntoIterator<Item = u32>, at: DateTime<Utc>) -> Self {
        let detailed: Vec<SlotDetail> = slot_ids
            .into_iter()
            .map(|id| SlotDetail {
                id,
                status: SlotStatus::Free,
                duration_secs: 0,
                fee: 0.0,
                is_overstay: false,
                is_reserved: false,
                reserved_remaining_secs: 0,
            })
            .collect();
        Self::from_details(detailed, 0, at)
    }

    /// Derive counts and revenue from the per-slot lines
    pub fn from_details(detailed: Vec<SlotDetail>, tick: u64, at: DateTime<Utc>) -> Self {
        let filled = detailed
            .iter()
            .filter(|d| d.status == SlotStatus::Filled)
            .count();
        let wrong = detailed
            .iter()
            .filter(|d| d.status == SlotStatus::Wrong)
            .count();
        let revenue = detailed
            .iter()
            .filter(|d| d.status.is_occupied())
            .map(|d| d.fee)
            .sum();

        Self {
            total: detailed.len(),
            free: detailed.len() - filled - wrong,
            filled,
            wrong,
            revenue,
            detailed,
            tick,
            generated_at: at,
        }
    }

    pub fn slot(&self, id: u32) -> Option<&SlotDetail> {
        self.detailed.iter().find(|d| d.id == id)
    }
}
