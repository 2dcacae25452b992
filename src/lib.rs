//! Slotwatch Library
//!
//! Parking slot occupancy engine
//!
//! ## Architecture
//!
//! 1. ZoneGeometry - Slot outlines and overlap arithmetic
//! 2. FrameClassifier - Per-frame FREE / FILLED / WRONG status
//! 3. OccupancyState - Sessions, durations and fees
//! 4. ReservationManager - Timed and manual slot holds
//! 5. AlertDispatcher - Cooled-down alerts and notification workers
//! 6. TickOrchestrator - The engine driving one cycle per frame
//! 7. HistoryStore - Session records (SQLite)
//! 8. ReceiptGenerator - Per-session receipts
//! 9. BookingService - Customer bookings
//! 10. SlotLayout - Saved layouts per source
//! 11. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - Single writer: one engine instance owns all mutable state
//! - Readers only see immutable snapshots
//! - Collaborator failures never stop the next cycle

pub mod zone_geometry;
pub mod frame_classifier;
pub mod occupancy_state;
pub mod reservation_manager;
pub mod alert_dispatcher;
pub mod notification;
pub mod tick_orchestrator;
pub mod history_store;
pub mod receipt_generator;
pub mod detector;
pub mod booking_service;
pub mod slot_layout;
pub mod web_api;
pub mod models;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
