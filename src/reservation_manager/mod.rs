//! ReservationManager - Time-boxed slot holds
//!
//! ## Responsibilities
//!
//! - Timed reservations (deadline + booking reference)
//! - Manual reservations (operator toggle, no deadline)
//! - Expiry sweep once per processing cycle
//!
//! ## Design
//!
//! - One hold per slot: a second `reserve` is a conflict, never an overwrite
//! - Reservations never change occupancy status; they are reported alongside it

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::occupancy_state::ReservationMirror;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// ReservationManager instance
#[derive(Debug, Default)]
pub struct ReservationManager {
    /// Timed holds (zone_id -> reservation)
    timed: HashMap<u32, Reservation>,
    /// Manual holds without deadline
    manual: BTreeSet<u32>,
}

impl ReservationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if slot has any hold
    pub fn is_reserved(&self, zone_id: u32) -> bool {
        self.timed.contains_key(&zone_id) || self.manual.contains(&zone_id)
    }

    /// Place a timed hold. Rejected if the slot is already held.
    pub fn reserve(
        &mut self,
        zone_id: u32,
        deadline: DateTime<Utc>,
        booking_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        if self.is_reserved(zone_id) {
            return Err(Error::Conflict(format!("Slot {} is already reserved", zone_id)));
        }
        if deadline <= now {
            return Err(Error::Validation(format!(
                "Reservation deadline for slot {} is not in the future",
                zone_id
            )));
        }

        let reservation = Reservation {
            zone_id,
            expires_at: deadline,
            booking_ref,
            created_at: now,
        };
        self.timed.insert(zone_id, reservation.clone());

        tracing::info!(
            zone_id = zone_id,
            expires_at = %reservation.expires_at,
            booking_ref = ?reservation.booking_ref,
            "Reservation created"
        );

        Ok(reservation)
    }

    /// Place a manual hold (no deadline). Rejected if the slot is already held.
    pub fn reserve_manual(&mut self, zone_id: u32) -> Result<()> {
        if self.is_reserved(zone_id) {
            return Err(Error::Conflict(format!("Slot {} is already reserved", zone_id)));
        }
        self.manual.insert(zone_id);
        tracing::info!(zone_id = zone_id, "Slot marked as reserved");
        Ok(())
    }

    /// Release any hold on the slot
    pub fn cancel(&mut self, zone_id: u32) -> Option<ReleasedHold> {
        if let Some(reservation) = self.timed.remove(&zone_id) {
            self.manual.remove(&zone_id);
            tracing::info!(zone_id = zone_id, "Reservation cancelled");
            return Some(ReleasedHold::Timed(reservation));
        }
        if self.manual.remove(&zone_id) {
            tracing::info!(zone_id = zone_id, "Manual reservation released");
            return Some(ReleasedHold::Manual);
        }
        None
    }

    /// Drop every timed hold whose deadline has passed.
    ///
    /// Must run before the frame is classified.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Reservation> {
        let expired_ids: Vec<u32> = self
            .timed
            .iter()
            .filter(|(_, r)| now > r.expires_at)
            .map(|(id, _)| *id)
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(reservation) = self.timed.remove(&id) {
                tracing::info!(
                    zone_id = id,
                    booking_ref = ?reservation.booking_ref,
                    "Reservation expired"
                );
                expired.push(reservation);
            }
        }
        expired
    }

    /// Timed hold for the slot, if any
    pub fn get(&self, zone_id: u32) -> Option<&Reservation> {
        self.timed.get(&zone_id)
    }

    /// Seconds until the timed hold expires (0 when none)
    pub fn remaining_secs(&self, zone_id: u32, now: DateTime<Utc>) -> i64 {
        self.timed
            .get(&zone_id)
            .map(|r| (r.expires_at - now).num_seconds().max(0))
            .unwrap_or(0)
    }

    /// Reservation attributes for the slot's runtime state
    pub fn mirror(&self, zone_id: u32) -> ReservationMirror {
        let timed = self.timed.get(&zone_id);
        ReservationMirror {
            reserved: self.is_reserved(zone_id),
            deadline: timed.map(|r| r.expires_at),
            booking_ref: timed.and_then(|r| r.booking_ref.clone()),
        }
    }

    /// Manually held slot ids, ascending
    pub fn manual_ids(&self) -> Vec<u32> {
        self.manual.iter().copied().collect()
    }

    /// Replace all holds after a layout change; only manual holds survive
    pub fn reset(&mut self, manual: impl IntoIterator<Item = u32>) {
        self.timed.clear();
        self.manual = manual.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_reserve_and_mirror() {
        let mut rm = ReservationManager::new();
        let deadline = t0() + Duration::seconds(900);
        rm.reserve(3, deadline, Some("48213".to_string()), t0()).unwrap();

        let mirror = rm.mirror(3);
        assert!(mirror.reserved);
        assert_eq!(mirror.deadline, Some(deadline));
        assert_eq!(mirror.booking_ref.as_deref(), Some("48213"));
        assert_eq!(rm.remaining_secs(3, t0() + Duration::seconds(100)), 800);
    }

    #[test]
    fn test_double_reserve_is_conflict_and_keeps_original() {
        let mut rm = ReservationManager::new();
        let deadline = t0() + Duration::seconds(900);
        rm.reserve(1, deadline, Some("11111".to_string()), t0()).unwrap();

        let result = rm.reserve(
            1,
            t0() + Duration::seconds(60),
            Some("22222".to_string()),
            t0(),
        );
        assert!(matches!(result, Err(Error::Conflict(_))));

        let kept = rm.get(1).unwrap();
        assert_eq!(kept.expires_at, deadline);
        assert_eq!(kept.booking_ref.as_deref(), Some("11111"));
    }

    #[test]
    fn test_manual_hold_blocks_timed_reserve() {
        let mut rm = ReservationManager::new();
        rm.reserve_manual(2).unwrap();
        assert!(rm.is_reserved(2));
        assert!(rm.mirror(2).deadline.is_none());
        assert!(matches!(
            rm.reserve(2, t0() + Duration::seconds(10), None, t0()),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_tick_expires_only_elapsed() {
        let mut rm = ReservationManager::new();
        rm.reserve(1, t0() + Duration::seconds(10), Some("a".into()), t0()).unwrap();
        rm.reserve(2, t0() + Duration::seconds(100), Some("b".into()), t0()).unwrap();
        rm.reserve_manual(3).unwrap();

        let expired = rm.tick(t0() + Duration::seconds(11));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].zone_id, 1);
        assert!(!rm.is_reserved(1));
        assert_eq!(rm.mirror(1), ReservationMirror::default());
        assert!(rm.is_reserved(2));
        assert!(rm.is_reserved(3));
    }

    #[test]
    fn test_cancel() {
        let mut rm = ReservationManager::new();
        rm.reserve(1, t0() + Duration::seconds(10), None, t0()).unwrap();
        rm.reserve_manual(2).unwrap();

        assert!(matches!(rm.cancel(1), Some(ReleasedHold::Timed(_))));
        assert!(matches!(rm.cancel(2), Some(ReleasedHold::Manual)));
        assert!(rm.cancel(3).is_none());
        assert!(!rm.is_reserved(1));
        assert!(!rm.is_reserved(2));
    }

    #[test]
    fn test_past_deadline_rejected() {
        let mut rm = ReservationManager::new();
        let result = rm.reserve(1, t0(), None, t0());
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!rm.is_reserved(1));
    }

    #[test]
    fn test_reset_keeps_only_manual() {
        let mut rm = ReservationManager::new();
        rm.reserve(1, t0() + Duration::seconds(10), None, t0()).unwrap();
        rm.reset([4, 5]);
        assert!(!rm.is_reserved(1));
        assert_eq!(rm.manual_ids(), vec![4, 5]);
    }
}
