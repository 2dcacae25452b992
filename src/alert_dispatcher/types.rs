//! AlertDispatcher types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alerting rule, also the second half of the cooldown key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    /// Vehicle spans more than one slot
    WrongParking,
    /// Session longer than the overstay threshold
    Overstay,
}

impl AlertRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRule::WrongParking => "wrong_parking",
            AlertRule::Overstay => "overstay",
        }
    }
}

/// Alert raised for one slot on one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub zone_id: u32,
    pub rule: AlertRule,
    pub text: String,
    pub raised_at: DateTime<Utc>,
}

impl AlertMessage {
    pub fn wrong_parking(zone_id: u32, at: DateTime<Utc>) -> Self {
        Self {
            zone_id,
            rule: AlertRule::WrongParking,
            text: format!(
                "SECURITY ALERT: Car in Slot {} is parked INCORRECTLY (taking 2 spaces)!",
                zone_id
            ),
            raised_at: at,
        }
    }

    pub fn overstay(zone_id: u32, fee: f64, at: DateTime<Utc>) -> Self {
        Self {
            zone_id,
            rule: AlertRule::Overstay,
            text: format!(
                "OVERSTAY ALERT: Slot {} has exceeded the time limit! Fee is currently ${:.2}.",
                zone_id, fee
            ),
            raised_at: at,
        }
    }
}

/// Anything placed on the notification queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Goes to the operator chat
    Alert(AlertMessage),
    /// Goes to the customer's chat
    BookingConfirmation {
        booking_id: String,
        chat_id: String,
        text: String,
    },
}

impl Outbound {
    pub fn text(&self) -> &str {
        match self {
            Outbound::Alert(alert) => &alert.text,
            Outbound::BookingConfirmation { text, .. } => text,
        }
    }

    /// Chat to deliver to; `None` means the operator chat
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Outbound::Alert(_) => None,
            Outbound::BookingConfirmation { chat_id, .. } => Some(chat_id),
        }
    }
}
