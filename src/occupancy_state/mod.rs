//! OccupancyStateMachine - Session tracking and billing per slot
//!
//! ## Responsibilities
//!
//! - Track FREE / FILLED / WRONG transitions against the previous tick
//! - Open and close parking sessions (entry / exit events)
//! - Accrue duration and fee for sessions in progress
//!
//! The machine performs no I/O. Transitions that the history store must
//! hear about are returned as [`SessionEvent`]s for the caller to deliver.

use crate::frame_classifier::SlotStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Linear proration: no minimum charge, no rounding
pub fn prorated_fee(duration_secs: i64, hourly_rate: f64) -> f64 {
    duration_secs as f64 / 3600.0 * hourly_rate
}

/// Overstay is strictly greater than the threshold
pub fn is_overstay(duration_secs: i64, threshold_secs: i64) -> bool {
    duration_secs > threshold_secs
}

/// Mutable runtime state of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRuntimeState {
    pub zone_id: u32,
    pub status: SlotStatus,
    pub previous_status: SlotStatus,
    pub session_start: Option<DateTime<Utc>>,
    pub reserved: bool,
    pub reservation_deadline: Option<DateTime<Utc>>,
    pub booking_ref: Option<String>,
}

impl ZoneRuntimeState {
    pub fn new(zone_id: u32) -> Self {
        Self {
            zone_id,
            status: SlotStatus::Free,
            previous_status: SlotStatus::Free,
            session_start: None,
            reserved: false,
            reservation_deadline: None,
            booking_ref: None,
        }
    }
}

/// Transition the history store must record
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// FREE -> FILLED/WRONG
    Entry {
        zone_id: u32,
        at: DateTime<Utc>,
    },
    /// FILLED/WRONG -> FREE with a known session start
    Exit {
        zone_id: u32,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
        duration_secs: i64,
        fee: f64,
    },
}

/// Per-slot result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneReading {
    pub zone_id: u32,
    pub status: SlotStatus,
    /// Whole seconds since session start, 0 when free
    pub duration_secs: i64,
    /// Fee accrued so far, 0 when free
    pub fee: f64,
}

/// Output of [`OccupancyStateMachine::advance`]
#[derive(Debug, Clone, Default)]
pub struct AdvanceOutcome {
    pub readings: Vec<ZoneReading>,
    pub events: Vec<SessionEvent>,
}

/// Reservation attributes mirrored into the runtime state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReservationMirror {
    pub reserved: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub booking_ref: Option<String>,
}

/// Owns one [`ZoneRuntimeState`] per configured slot
#[derive(Debug, Default)]
pub struct OccupancyStateMachine {
    states: Vec<ZoneRuntimeState>,
}

impl OccupancyStateMachine {
    /// Fresh state for the given slot ids, all FREE with no sessions
    pub fn new(zone_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            states: zone_ids.into_iter().map(ZoneRuntimeState::new).collect(),
        }
    }

    /// Replace every runtime state; open sessions are dropped, not carried over
    pub fn reset(&mut self, zone_ids: impl IntoIterator<Item = u32>) {
        let dropped = self
            .states
            .iter()
            .filter(|s| s.session_start.is_some())
            .count();
        if dropped > 0 {
            tracing::info!(
                dropped_sessions = dropped,
                "Slot layout replaced, open sessions discarded"
            );
        }
        *self = Self::new(zone_ids);
    }

    pub fn states(&self) -> &[ZoneRuntimeState] {
        &self.states
    }

    pub fn state(&self, zone_id: u32) -> Option<&ZoneRuntimeState> {
        self.states.iter().find(|s| s.zone_id == zone_id)
    }

    /// Copy reservation attributes into each slot's runtime state
    pub fn mirror_reservations(&mut self, lookup: impl Fn(u32) -> ReservationMirror) {
        for state in &mut self.states {
            let mirror = lookup(state.zone_id);
            state.reserved = mirror.reserved;
            state.reservation_deadline = mirror.deadline;
            state.booking_ref = mirror.booking_ref;
        }
    }

    /// Apply one frame's raw statuses (in slot order).
    ///
    /// Slots missing from `raw` are treated as FREE.
    pub fn advance(
        &mut self,
        now: DateTime<Utc>,
        raw: &[SlotStatus],
        hourly_rate: f64,
    ) -> AdvanceOutcome {
        let mut outcome = AdvanceOutcome {
            readings: Vec::with_capacity(self.states.len()),
            events: Vec::new(),
        };

        for (idx, state) in self.states.iter_mut().enumerate() {
            let status = raw.get(idx).copied().unwrap_or_default();
            let prev = state.status;
            let zone_id = state.zone_id;
            let elapsed = |start: DateTime<Utc>| (now - start).num_seconds().max(0);

            let (duration_secs, fee) = match (prev.is_occupied(), status.is_occupied()) {
                (false, true) => {
                    let start = *state.session_start.get_or_insert(now);
                    tracing::info!(zone_id = zone_id, status = %status, "Vehicle entered slot");
                    outcome.events.push(SessionEvent::Entry {
                        zone_id,
                        at: now,
                    });
                    let duration = elapsed(start);
                    (duration, prorated_fee(duration, hourly_rate))
                }
                (true, true) => {
                    let start = *state.session_start.get_or_insert_with(|| {
                        tracing::warn!(
                            zone_id = zone_id,
                            "Occupied slot had no session start, restarting session"
                        );
                        now
                    });
                    let duration = elapsed(start);
                    (duration, prorated_fee(duration, hourly_rate))
                }
                (true, false) => {
                    match state.session_start.take() {
                        Some(start) => {
                            let duration = elapsed(start);
                            let fee = prorated_fee(duration, hourly_rate);
                            tracing::info!(
                                zone_id = zone_id,
                                duration_secs = duration,
                                fee = fee,
                                "Vehicle left slot"
                            );
                            outcome.events.push(SessionEvent::Exit {
                                zone_id,
                                entry_time: start,
                                exit_time: now,
                                duration_secs: duration,
                                fee,
                            });
                        }
                        None => {
                            tracing::warn!(
                                zone_id = zone_id,
                                "Exit without recorded session start, skipping exit record"
                            );
                        }
                    }
                    (0, 0.0)
                }
                (false, false) => {
                    state.session_start = None;
                    (0, 0.0)
                }
            };

            state.previous_status = prev;
            state.status = status;

            outcome.readings.push(ZoneReading {
                zone_id,
                status,
                duration_secs,
                fee,
            });
        }

        outcome
    }
}
