//! ReservationManager types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timed hold on a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub zone_id: u32,
    pub expires_at: DateTime<Utc>,
    /// Booking that owns this hold, if it came from a booking
    pub booking_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What `cancel` released
#[derive(Debug, Clone, PartialEq)]
pub enum ReleasedHold {
    Timed(Reservation),
    Manual,
}
