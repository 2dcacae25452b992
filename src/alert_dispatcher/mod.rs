//! AlertDispatcher - Cooled-down alerts from the published snapshot
//!
//! ## Responsibilities
//!
//! - Evaluate WRONG-parking and overstay rules per slot
//! - Suppress repeats inside the cooldown window, per (slot, rule)
//! - Hand alerts to the notification queue without waiting on delivery
//!
//! ## Cooldown
//!
//! An alert fires when `now - last_fired > window` (or it never fired).
//! `last_fired` is updated on every attempt, whether or not the queue
//! accepted the message. Entries live for the process lifetime.

mod types;
mod worker;

pub use types::*;
pub use worker::{spawn_workers, NotificationQueue};

use crate::frame_classifier::SlotStatus;
use crate::models::OccupancySnapshot;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// AlertDispatcher instance
pub struct AlertDispatcher {
    queue: NotificationQueue,
    last_fired: HashMap<(u32, AlertRule), DateTime<Utc>>,
}

impl AlertDispatcher {
    pub fn new(queue: NotificationQueue) -> Self {
        Self {
            queue,
            last_fired: HashMap::new(),
        }
    }

    /// Evaluate every slot of the snapshot. Returns the alerts that were fired.
    pub fn evaluate(
        &mut self,
        snapshot: &OccupancySnapshot,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> Vec<AlertMessage> {
        let mut fired = Vec::new();

        for detail in &snapshot.detailed {
            if detail.status == SlotStatus::Wrong {
                let alert = AlertMessage::wrong_parking(detail.id, now);
                if self.try_fire(alert.clone(), now, window_secs) {
                    fired.push(alert);
                }
            }
            if detail.is_overstay {
                let alert = AlertMessage::overstay(detail.id, detail.fee, now);
                if self.try_fire(alert.clone(), now, window_secs) {
                    fired.push(alert);
                }
            }
        }

        fired
    }

    fn try_fire(&mut self, alert: AlertMessage, now: DateTime<Utc>, window_secs: i64) -> bool {
        let key = (alert.zone_id, alert.rule);
        if let Some(last) = self.last_fired.get(&key) {
            // A window too large for chrono never elapses
            let cooling = Duration::try_seconds(window_secs).map_or(true, |w| now - *last <= w);
            if cooling {
                return false;
            }
        }

        self.last_fired.insert(key, now);
        tracing::info!(
            zone_id = alert.zone_id,
            rule = alert.rule.as_str(),
            "Alert dispatched"
        );
        self.queue.enqueue(Outbound::Alert(alert));
        true
    }

    /// When the (slot, rule) pair last fired
    pub fn last_fired(&self, zone_id: u32, rule: AlertRule) -> Option<DateTime<Utc>> {
        self.last_fired.get(&(zone_id, rule)).copied()
    }

    /// Queue handle shared with other producers (booking confirmations)
    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SlotDetail;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
    }

    fn snapshot(status: SlotStatus, is_overstay: bool) -> OccupancySnapshot {
        OccupancySnapshot::from_details(
            vec![SlotDetail {
                id: 1,
                status,
                duration_secs: 200,
                fee: 0.2777,
                is_overstay,
                is_reserved: false,
                reserved_remaining_secs: 0,
            }],
            1,
            t0(),
        )
    }

    fn dispatcher(capacity: usize) -> (AlertDispatcher, mpsc::Receiver<Outbound>) {
        let (queue, rx) = NotificationQueue::bounded(capacity);
        (AlertDispatcher::new(queue), rx)
    }

    #[test]
    fn test_cooldown_window() {
        let (mut d, mut rx) = dispatcher(16);
        let snap = snapshot(SlotStatus::Wrong, false);

        assert_eq!(d.evaluate(&snap, t0(), 60).len(), 1);
        assert!(d.evaluate(&snap, t0() + Duration::seconds(30), 60).is_empty());
        assert!(d.evaluate(&snap, t0() + Duration::seconds(60), 60).is_empty());
        assert_eq!(d.evaluate(&snap, t0() + Duration::seconds(61), 60).len(), 1);

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);
    }

    #[test]
    fn test_rules_cool_down_independently() {
        let (mut d, _rx) = dispatcher(16);
        let fired = d.evaluate(&snapshot(SlotStatus::Wrong, true), t0(), 60);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].rule, AlertRule::WrongParking);
        assert_eq!(fired[1].rule, AlertRule::Overstay);
        assert_eq!(
            fired[1].text,
            "OVERSTAY ALERT: Slot 1 has exceeded the time limit! Fee is currently $0.28."
        );
    }

    #[test]
    fn test_full_queue_still_records_attempt() {
        let (mut d, _rx) = dispatcher(1);
        // Fill the queue so the next alert is dropped
        assert!(d.queue().enqueue(Outbound::BookingConfirmation {
            booking_id: "1".to_string(),
            chat_id: "2".to_string(),
            text: "x".to_string(),
        }));

        let fired = d.evaluate(&snapshot(SlotStatus::Wrong, false), t0(), 60);
        assert_eq!(fired.len(), 1);
        assert_eq!(d.queue().dropped(), 1);
        assert_eq!(d.last_fired(1, AlertRule::WrongParking), Some(t0()));
    }

    #[test]
    fn test_huge_window_suppresses_without_panic() {
        let (mut d, _rx) = dispatcher(16);
        let snap = snapshot(SlotStatus::Wrong, false);
        assert_eq!(d.evaluate(&snap, t0(), i64::MAX).len(), 1);
        assert!(d
            .evaluate(&snap, t0() + Duration::seconds(3600), i64::MAX)
            .is_empty());
    }

    #[test]
    fn test_free_slot_raises_nothing() {
        let (mut d, _rx) = dispatcher(4);
        assert!(d.evaluate(&snapshot(SlotStatus::Free, false), t0(), 60).is_empty());
        assert!(d.last_fired(1, AlertRule::WrongParking).is_none());
    }
}
