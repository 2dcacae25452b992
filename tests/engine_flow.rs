//! End-to-end engine cycles with recording collaborators

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use slotwatch::alert_dispatcher::{NotificationQueue, Outbound};
use slotwatch::frame_classifier::{Detection, SlotStatus};
use slotwatch::history_store::{HistoryRepository, SessionRecorder};
use slotwatch::receipt_generator::{Receipt, ReceiptGenerator};
use slotwatch::slot_layout::SlotLayout;
use slotwatch::tick_orchestrator::{
    spawn_persistence_worker, EngineCollaborators, EngineSettings, ParkingEngine,
    SessionEventQueue, DEFAULT_CALL_TIMEOUT,
};
use slotwatch::zone_geometry::Point;
use slotwatch::{Error, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Entry(u32),
    Exit {
        zone_id: u32,
        duration_secs: i64,
        fee: f64,
    },
}

#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<Call>>,
}

#[async_trait]
impl SessionRecorder for RecordingStore {
    async fn log_entry(&self, zone_id: u32, _at: DateTime<Utc>) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Entry(zone_id));
        Ok(())
    }

    async fn log_exit(
        &self,
        zone_id: u32,
        duration_secs: i64,
        fee: f64,
        _at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call::Exit {
            zone_id,
            duration_secs,
            fee,
        });
        Ok(Some(calls.len() as i64))
    }
}

#[derive(Default)]
struct RecordingReceipts {
    receipts: Mutex<Vec<Receipt>>,
}

#[async_trait]
impl ReceiptGenerator for RecordingReceipts {
    async fn generate(&self, receipt: &Receipt) -> Result<PathBuf> {
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(PathBuf::from(receipt.file_name()))
    }
}

struct FailingStore;

#[async_trait]
impl SessionRecorder for FailingStore {
    async fn log_entry(&self, _zone_id: u32, _at: DateTime<Utc>) -> Result<()> {
        Err(Error::Database("locked".to_string()))
    }

    async fn log_exit(&self, _: u32, _: i64, _: f64, _: DateTime<Utc>) -> Result<Option<i64>> {
        Err(Error::Database("locked".to_string()))
    }
}

struct Harness {
    engine: ParkingEngine,
    store: Arc<RecordingStore>,
    receipts: Arc<RecordingReceipts>,
    rx: mpsc::Receiver<Outbound>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

/// Two 100x100 slots side by side
fn two_slots() -> SlotLayout {
    let outline = |x: f64| {
        vec![
            Point::new(x, 0.0),
            Point::new(x + 100.0, 0.0),
            Point::new(x + 100.0, 100.0),
            Point::new(x, 100.0),
        ]
    };
    SlotLayout {
        slots: vec![outline(0.0), outline(100.0)],
        reserved: vec![],
    }
}

fn parked_in_slot_1() -> Detection {
    Detection::new(10.0, 10.0, 90.0, 90.0)
}

fn straddling() -> Detection {
    Detection::new(50.0, 10.0, 150.0, 90.0)
}

/// Engine wired to a persistence worker over the given collaborators
async fn engine_with(
    settings: EngineSettings,
    recorder: Arc<dyn SessionRecorder>,
    receipts: Arc<dyn ReceiptGenerator>,
) -> (ParkingEngine, mpsc::Receiver<Outbound>) {
    let (events, events_rx) = SessionEventQueue::bounded(64);
    spawn_persistence_worker(events_rx, recorder, receipts, DEFAULT_CALL_TIMEOUT);
    let (queue, rx) = NotificationQueue::bounded(64);
    let engine = ParkingEngine::new(
        settings,
        EngineCollaborators {
            events,
            detector: None,
            queue,
        },
    )
    .unwrap();
    engine.apply_layout(&two_slots(), t0()).await.unwrap();
    (engine, rx)
}

async fn harness(settings: EngineSettings) -> Harness {
    let store = Arc::new(RecordingStore::default());
    let receipts = Arc::new(RecordingReceipts::default());
    let (engine, rx) = engine_with(settings, store.clone(), receipts.clone()).await;
    Harness {
        engine,
        store,
        receipts,
        rx,
    }
}

fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test]
async fn test_fee_accrues_while_parked() {
    let h = harness(EngineSettings::default()).await;
    h.engine.tick(at(0), &[parked_in_slot_1()]).await;
    let snap = h.engine.tick(at(10), &[parked_in_slot_1()]).await;

    let slot = snap.slot(1).unwrap();
    assert_eq!(slot.status, SlotStatus::Filled);
    assert_eq!(slot.duration_secs, 10);
    assert!((slot.fee - 0.0139).abs() < 1e-4);
    assert!((snap.revenue - slot.fee).abs() < 1e-12);
    assert_eq!(snap.slot(2).unwrap().status, SlotStatus::Free);
}

#[tokio::test]
async fn test_hour_long_session_logs_one_exit_and_receipt() {
    let h = harness(EngineSettings::default()).await;
    h.engine.tick(at(0), &[parked_in_slot_1()]).await;
    h.engine.tick(at(1800), &[parked_in_slot_1()]).await;
    let snap = h.engine.tick(at(3600), &[]).await;

    assert_eq!(snap.free, 2);
    assert_eq!(snap.revenue, 0.0);

    h.engine.events().flush().await;
    let calls = h.store.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            Call::Entry(1),
            Call::Exit {
                zone_id: 1,
                duration_secs: 3600,
                fee: 5.0
            },
        ]
    );

    let receipts = h.receipts.receipts.lock().unwrap().clone();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].slot_id, 1);
    assert_eq!(receipts[0].total_paid, 5.0);
    assert_eq!(receipts[0].duration, "1h 0m 0s");
}

#[tokio::test]
async fn test_overstay_boundary() {
    let h = harness(EngineSettings::default()).await;
    h.engine.tick(at(0), &[parked_in_slot_1()]).await;

    let snap = h.engine.tick(at(179), &[parked_in_slot_1()]).await;
    assert!(!snap.slot(1).unwrap().is_overstay);
    let snap = h.engine.tick(at(180), &[parked_in_slot_1()]).await;
    assert!(!snap.slot(1).unwrap().is_overstay);
    let snap = h.engine.tick(at(181), &[parked_in_slot_1()]).await;
    assert!(snap.slot(1).unwrap().is_overstay);
}

#[tokio::test]
async fn test_wrong_parking_alert_cooldown() {
    let mut h = harness(EngineSettings::default()).await;

    let snap = h.engine.tick(at(0), &[straddling()]).await;
    assert_eq!(snap.wrong, 2);
    h.engine.tick(at(30), &[straddling()]).await;
    let first = drain(&mut h.rx);
    assert_eq!(first.len(), 2, "one alert per slot inside the window");
    assert!(first[0]
        .text()
        .starts_with("SECURITY ALERT: Car in Slot 1 is parked INCORRECTLY"));

    h.engine.tick(at(61), &[straddling()]).await;
    assert_eq!(drain(&mut h.rx).len(), 2);
}

#[tokio::test]
async fn test_expired_reservation_cleared_before_classification() {
    let h = harness(EngineSettings::default()).await;
    h.engine
        .reserve_until(1, at(10), Some("48213".to_string()), t0())
        .await
        .unwrap();

    let snap = h.engine.tick(at(5), &[]).await;
    assert!(snap.slot(1).unwrap().is_reserved);
    assert_eq!(snap.slot(1).unwrap().reserved_remaining_secs, 5);

    let snap = h.engine.tick(at(11), &[parked_in_slot_1()]).await;
    let slot = snap.slot(1).unwrap();
    assert!(!slot.is_reserved);
    assert_eq!(slot.reserved_remaining_secs, 0);
    assert_eq!(slot.status, SlotStatus::Filled);
    assert!(h.engine.reservation(1).await.is_none());
}

#[tokio::test]
async fn test_reservation_does_not_change_status() {
    let h = harness(EngineSettings::default()).await;
    h.engine.reserve(1, None, t0()).await.unwrap();
    let snap = h.engine.tick(at(1), &[parked_in_slot_1()]).await;
    let slot = snap.slot(1).unwrap();
    assert_eq!(slot.status, SlotStatus::Filled);
    assert!(slot.is_reserved);
}

#[tokio::test]
async fn test_rejected_reserve_keeps_original_hold() {
    let h = harness(EngineSettings::default()).await;
    h.engine
        .reserve_until(2, at(900), Some("11111".to_string()), t0())
        .await
        .unwrap();

    let result = h
        .engine
        .reserve_until(2, at(60), Some("22222".to_string()), at(1))
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));

    let kept = h.engine.reservation(2).await.unwrap();
    assert_eq!(kept.expires_at, at(900));
    assert_eq!(kept.booking_ref.as_deref(), Some("11111"));
}

#[tokio::test]
async fn test_layout_change_drops_open_sessions() {
    let h = harness(EngineSettings::default()).await;
    h.engine.tick(at(0), &[parked_in_slot_1()]).await;

    let mut layout = two_slots();
    layout.reserved = vec![2];
    h.engine.apply_layout(&layout, at(5)).await.unwrap();

    let snap = h.engine.snapshot().await;
    assert_eq!(snap.free, 2);
    assert!(snap.slot(2).unwrap().is_reserved);

    // The car is still there: a fresh session starts, no exit is logged
    h.engine.tick(at(10), &[parked_in_slot_1()]).await;
    h.engine.events().flush().await;
    let calls = h.store.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![Call::Entry(1), Call::Entry(1)]);
}

#[tokio::test]
async fn test_persistence_failure_does_not_stop_ticks() {
    let receipts = Arc::new(RecordingReceipts::default());
    let (engine, _rx) =
        engine_with(EngineSettings::default(), Arc::new(FailingStore), receipts.clone()).await;

    engine.tick(at(0), &[parked_in_slot_1()]).await;
    engine.tick(at(10), &[]).await;
    let snap = engine.tick(at(20), &[parked_in_slot_1()]).await;
    assert_eq!(snap.tick, 3);
    assert_eq!(snap.filled, 1);

    engine.events().flush().await;
    assert!(receipts.receipts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_sqlite_history_through_engine() {
    let history = HistoryRepository::connect("sqlite::memory:").await.unwrap();
    let receipts = Arc::new(RecordingReceipts::default());
    let (engine, _rx) = engine_with(
        EngineSettings::default(),
        Arc::new(history.clone()),
        receipts.clone(),
    )
    .await;

    engine.tick(at(0), &[parked_in_slot_1()]).await;
    engine.tick(at(3600), &[]).await;
    engine.events().flush().await;

    let records = history.fetch_recent(20).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].slot_id, 1);
    assert_eq!(records[0].duration_seconds, Some(3600));
    assert_eq!(records[0].fee, Some(5.0));

    let receipts = receipts.receipts.lock().unwrap().clone();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].record_id, records[0].id);
}

#[tokio::test]
async fn test_settings_update_applies_next_tick() {
    let h = harness(EngineSettings::default()).await;
    h.engine
        .update_settings(&slotwatch::tick_orchestrator::SettingsUpdate {
            hourly_rate: Some(10.0),
            ..Default::default()
        })
        .await
        .unwrap();

    h.engine.tick(at(0), &[parked_in_slot_1()]).await;
    let snap = h.engine.tick(at(360), &[parked_in_slot_1()]).await;
    assert!((snap.slot(1).unwrap().fee - 1.0).abs() < 1e-9);
}
