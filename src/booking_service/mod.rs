//! BookingService - Customer slot bookings
//!
//! ## Responsibilities
//!
//! - Take a booking for a slot and hold it for the reservation window
//! - Look up bookings by ticket id
//! - Send the booking confirmation to the customer through the notification queue
//!
//! Confirmations are only sent when `mobile` is a numeric chat id.
//!
//! A booking's status follows its reservation: once the hold is gone the
//! booking reads as `Expired`, or `Cancelled` if it was released on request.

use crate::alert_dispatcher::Outbound;
use crate::error::{Error, Result};
use crate::reservation_manager::ReleasedHold;
use crate::tick_orchestrator::ParkingEngine;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Expired,
    Cancelled,
}

/// Booking request body
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub slot_id: u32,
    pub name: String,
    pub car: String,
    pub mobile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub slot_id: u32,
    pub name: String,
    pub car: String,
    pub mobile: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: BookingStatus,
}

/// Confirmation text sent after a successful booking
pub fn confirmation_message(booking: &Booking) -> String {
    format!(
        "PARKING CONFIRMED!\n\nName: {}\nCar: {}\nSlot: {}\nTicket ID: {}\n\nPlease show this ID to the guard.",
        booking.name, booking.car, booking.slot_id, booking.booking_id
    )
}

fn is_chat_id(mobile: &str) -> bool {
    !mobile.is_empty() && mobile.chars().all(|c| c.is_ascii_digit())
}

/// BookingService instance
pub struct BookingService {
    engine: Arc<ParkingEngine>,
    bookings: RwLock<BTreeMap<String, Booking>>,
    cancelled: RwLock<HashSet<String>>,
}

impl BookingService {
    pub fn new(engine: Arc<ParkingEngine>) -> Self {
        Self {
            engine,
            bookings: RwLock::new(BTreeMap::new()),
            cancelled: RwLock::new(HashSet::new()),
        }
    }

    /// Book a slot. Rejected if the slot is unknown or already held.
    pub async fn submit(&self, req: BookingRequest, now: DateTime<Utc>) -> Result<Booking> {
        for (field, value) in [("name", &req.name), ("car", &req.car), ("mobile", &req.mobile)] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} is required", field)));
            }
        }
        if !self.engine.has_zone(req.slot_id).await {
            return Err(Error::NotFound(format!("Slot {} not found", req.slot_id)));
        }

        let mut bookings = self.bookings.write().await;
        let booking_id = loop {
            let candidate = rand::thread_rng().gen_range(10000..=99999).to_string();
            if !bookings.contains_key(&candidate) {
                break candidate;
            }
        };

        let reservation = self
            .engine
            .reserve(req.slot_id, Some(booking_id.clone()), now)
            .await?;

        let booking = Booking {
            booking_id: booking_id.clone(),
            slot_id: req.slot_id,
            name: req.name,
            car: req.car,
            mobile: req.mobile,
            created_at: now,
            expires_at: reservation.expires_at,
            status: BookingStatus::Active,
        };
        bookings.insert(booking_id.clone(), booking.clone());
        drop(bookings);

        if is_chat_id(&booking.mobile) {
            self.engine.queue().enqueue(Outbound::BookingConfirmation {
                booking_id: booking_id.clone(),
                chat_id: booking.mobile.clone(),
                text: confirmation_message(&booking),
            });
        } else {
            tracing::debug!(
                booking_id = %booking_id,
                "Mobile is not a chat id, confirmation skipped"
            );
        }

        tracing::info!(
            booking_id = %booking_id,
            slot_id = booking.slot_id,
            expires_at = %booking.expires_at,
            "Booking created"
        );
        Ok(booking)
    }

    /// Booking with its current status
    pub async fn verify(&self, booking_id: &str) -> Result<Booking> {
        let booking = self
            .bookings
            .read()
            .await
            .get(booking_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Invalid Booking ID".to_string()))?;
        Ok(self.with_status(booking).await)
    }

    /// Every booking with its current status, oldest id first
    pub async fn list(&self) -> Vec<Booking> {
        let bookings: Vec<Booking> = self.bookings.read().await.values().cloned().collect();
        join_all(bookings.into_iter().map(|b| self.with_status(b))).await
    }

    /// Release the slot's hold; a booking that owned it becomes `Cancelled`
    pub async fn cancel_reservation(
        &self,
        slot_id: u32,
        now: DateTime<Utc>,
    ) -> Result<ReleasedHold> {
        let released = self.engine.cancel(slot_id, now).await?;
        if let ReleasedHold::Timed(reservation) = &released {
            if let Some(booking_id) = &reservation.booking_ref {
                self.cancelled.write().await.insert(booking_id.clone());
                tracing::info!(booking_id = %booking_id, slot_id = slot_id, "Booking cancelled");
            }
        }
        Ok(released)
    }

    async fn with_status(&self, mut booking: Booking) -> Booking {
        let held = self
            .engine
            .reservation(booking.slot_id)
            .await
            .and_then(|r| r.booking_ref)
            .map(|owner| owner == booking.booking_id)
            .unwrap_or(false);

        booking.status = if held {
            BookingStatus::Active
        } else if self.cancelled.read().await.contains(&booking.booking_id) {
            BookingStatus::Cancelled
        } else {
            BookingStatus::Expired
        };
        booking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_dispatcher::NotificationQueue;
    use crate::slot_layout::SlotLayout;
    use crate::tick_orchestrator::{EngineCollaborators, EngineSettings, SessionEventQueue};
    use crate::zone_geometry::Point;
    use chrono::{Duration, TimeZone};
    use tokio::sync::mpsc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    async fn service() -> (BookingService, mpsc::Receiver<Outbound>) {
        let (queue, rx) = NotificationQueue::bounded(8);
        // No persistence worker: session events are not under test here
        let (events, _events_rx) = SessionEventQueue::bounded(8);
        let engine = ParkingEngine::new(
            EngineSettings::default(),
            EngineCollaborators {
                events,
                detector: None,
                queue,
            },
        )
        .unwrap();
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        engine
            .apply_layout(
                &SlotLayout {
                    slots: vec![square],
                    reserved: vec![],
                },
                t0(),
            )
            .await
            .unwrap();
        (BookingService::new(Arc::new(engine)), rx)
    }

    fn request(slot_id: u32) -> BookingRequest {
        BookingRequest {
            slot_id,
            name: "Ana".to_string(),
            car: "KA01AB1234".to_string(),
            mobile: "555".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_reserves_and_confirms() {
        let (svc, mut rx) = service().await;
        let booking = svc.submit(request(1), t0()).await.unwrap();

        assert_eq!(booking.booking_id.len(), 5);
        assert_eq!(booking.expires_at, t0() + Duration::seconds(900));
        assert_eq!(svc.verify(&booking.booking_id).await.unwrap().status, BookingStatus::Active);

        match rx.try_recv().unwrap() {
            Outbound::BookingConfirmation {
                booking_id,
                chat_id,
                text,
            } => {
                assert_eq!(booking_id, booking.booking_id);
                assert_eq!(chat_id, "555");
                assert!(text.contains("Slot: 1"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_numeric_mobile_gets_no_confirmation() {
        let (svc, mut rx) = service().await;
        let mut req = request(1);
        req.mobile = "+1 555".to_string();
        svc.submit(req, t0()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_booking_on_slot_is_conflict() {
        let (svc, _rx) = service().await;
        svc.submit(request(1), t0()).await.unwrap();
        assert!(matches!(svc.submit(request(1), t0()).await, Err(Error::Conflict(_))));
        assert_eq!(svc.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_slot_and_missing_fields() {
        let (svc, _rx) = service().await;
        assert!(matches!(svc.submit(request(7), t0()).await, Err(Error::NotFound(_))));

        let mut blank = request(1);
        blank.name = " ".to_string();
        assert!(matches!(svc.submit(blank, t0()).await, Err(Error::Validation(_))));
        assert!(matches!(svc.verify("00000").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_follows_reservation() {
        let (svc, _rx) = service().await;
        let booking = svc.submit(request(1), t0()).await.unwrap();
        svc.cancel_reservation(1, t0()).await.unwrap();
        assert_eq!(
            svc.verify(&booking.booking_id).await.unwrap().status,
            BookingStatus::Cancelled
        );

        let second = svc.submit(request(1), t0()).await.unwrap();
        svc.engine.tick(t0() + Duration::seconds(901), &[]).await;
        assert_eq!(
            svc.verify(&second.booking_id).await.unwrap().status,
            BookingStatus::Expired
        );
    }
}
