//! TickOrchestrator - The parking engine
//!
//! ## Responsibilities
//!
//! - Run one processing cycle per frame of detections
//! - Deliver session events to the history store and receipt generator
//! - Publish an immutable snapshot per cycle
//! - Serve reservation and layout changes between cycles
//!
//! ## Cycle order
//!
//! 1. Expire reservations
//! 2. Classify detections against the slot outlines
//! 3. Advance the session state machine
//! 4. Queue entry / exit events for the persistence worker
//! 5. Build and publish the snapshot, then evaluate alerts
//!
//! The cycle never waits on I/O. History rows and receipts are written by the
//! persistence worker; a failure there is logged and only costs that record.
//! The engine state is behind a single mutex so cycles never interleave.

mod persistence;
mod settings;

pub use persistence::{
    spawn_persistence_worker, SessionEventQueue, SessionEventReceiver, DEFAULT_CALL_TIMEOUT,
};
pub use settings::{EngineSettings, SettingsUpdate, MAX_WINDOW_SECS};

use crate::alert_dispatcher::{AlertDispatcher, NotificationQueue};
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::frame_classifier::{classify, Detection};
use crate::models::{OccupancySnapshot, SlotDetail};
use crate::occupancy_state::{is_overstay, OccupancyStateMachine};
use crate::reservation_manager::{ReleasedHold, Reservation, ReservationManager};
use crate::slot_layout::SlotLayout;
use crate::zone_geometry::{Point, Zone};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// External services the engine talks to
pub struct EngineCollaborators {
    pub events: SessionEventQueue,
    pub detector: Option<Arc<dyn Detector>>,
    pub queue: NotificationQueue,
}

/// Result of a manual reservation toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub zone_id: u32,
    pub reserved: bool,
}

struct EngineCore {
    zones: Vec<Zone>,
    machine: OccupancyStateMachine,
    reservations: ReservationManager,
    alerts: AlertDispatcher,
    ticks: u64,
}

impl EngineCore {
    fn zone_ids(&self) -> Vec<u32> {
        self.zones.iter().map(|z| z.id).collect()
    }

    fn require_zone(&self, zone_id: u32) -> Result<()> {
        if self.zones.iter().any(|z| z.id == zone_id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Slot {} not found", zone_id)))
        }
    }

    fn mirror_reservations(&mut self) {
        let reservations = &self.reservations;
        self.machine
            .mirror_reservations(|zone_id| reservations.mirror(zone_id));
    }
}

/// Parking engine instance
pub struct ParkingEngine {
    core: Mutex<EngineCore>,
    settings: RwLock<EngineSettings>,
    published: RwLock<Arc<OccupancySnapshot>>,
    events: SessionEventQueue,
    detector: Option<Arc<dyn Detector>>,
    queue: NotificationQueue,
}

impl ParkingEngine {
    /// Engine with no slots configured
    pub fn new(settings: EngineSettings, collaborators: EngineCollaborators) -> Result<Self> {
        settings.validate()?;

        let core = EngineCore {
            zones: Vec::new(),
            machine: OccupancyStateMachine::default(),
            reservations: ReservationManager::new(),
            alerts: AlertDispatcher::new(collaborators.queue.clone()),
            ticks: 0,
        };

        Ok(Self {
            core: Mutex::new(core),
            settings: RwLock::new(settings),
            published: RwLock::new(Arc::new(OccupancySnapshot::empty(Vec::new(), Utc::now()))),
            events: collaborators.events,
            detector: collaborators.detector,
            queue: collaborators.queue,
        })
    }

    /// Latest published snapshot
    pub async fn snapshot(&self) -> Arc<OccupancySnapshot> {
        self.published.read().await.clone()
    }

    pub async fn settings(&self) -> EngineSettings {
        self.settings.read().await.clone()
    }

    /// Apply a partial update; takes effect on the next cycle
    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<EngineSettings> {
        let mut settings = self.settings.write().await;
        let next = settings.apply(update)?;
        *settings = next.clone();
        tracing::info!(settings = ?next, "Engine settings updated");
        Ok(next)
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    /// Session events awaiting persistence
    pub fn events(&self) -> &SessionEventQueue {
        &self.events
    }

    pub async fn zone_ids(&self) -> Vec<u32> {
        self.core.lock().await.zone_ids()
    }

    pub async fn has_zone(&self, zone_id: u32) -> bool {
        self.core.lock().await.require_zone(zone_id).is_ok()
    }

    pub async fn tick_count(&self) -> u64 {
        self.core.lock().await.ticks
    }

    /// Run one processing cycle with the given detections
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        detections: &[Detection],
    ) -> Arc<OccupancySnapshot> {
        let settings = self.settings().await;
        let mut core = self.core.lock().await;

        core.reservations.tick(now);
        core.mirror_reservations();

        let raw = classify(&core.zones, detections, &settings.thresholds());
        let outcome = core.machine.advance(now, &raw, settings.hourly_rate);
        core.ticks += 1;

        for event in outcome.events {
            self.events.enqueue(event);
        }

        let detailed: Vec<SlotDetail> = outcome
            .readings
            .iter()
            .map(|reading| SlotDetail {
                id: reading.zone_id,
                status: reading.status,
                duration_secs: reading.duration_secs,
                fee: reading.fee,
                is_overstay: is_overstay(reading.duration_secs, settings.overstay_threshold_secs),
                is_reserved: core.reservations.is_reserved(reading.zone_id),
                reserved_remaining_secs: core.reservations.remaining_secs(reading.zone_id, now),
            })
            .collect();
        let snapshot = Arc::new(OccupancySnapshot::from_details(detailed, core.ticks, now));

        *self.published.write().await = snapshot.clone();
        core.alerts
            .evaluate(&snapshot, now, settings.alert_cooldown_secs);

        tracing::debug!(
            tick = snapshot.tick,
            detections = detections.len(),
            filled = snapshot.filled,
            wrong = snapshot.wrong,
            free = snapshot.free,
            "Tick complete"
        );

        snapshot
    }

    /// Detect vehicles in a JPEG frame, then run one cycle.
    ///
    /// A failing detector yields an empty frame for this cycle.
    pub async fn process_frame(
        &self,
        frame: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<Arc<OccupancySnapshot>> {
        let detector = self
            .detector
            .as_ref()
            .ok_or_else(|| Error::Config("No detector configured".to_string()))?;

        let detections = match detector.detect(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(error = %e, "Detector failed, treating frame as empty");
                Vec::new()
            }
        };

        Ok(self.tick(now, &detections).await)
    }

    /// Replace the slot layout.
    ///
    /// Open sessions and timed reservations are dropped; the layout's manual
    /// holds are applied. Alert cooldowns are kept.
    pub async fn apply_layout(&self, layout: &SlotLayout, now: DateTime<Utc>) -> Result<()> {
        let zones = Zone::from_outlines(&layout.slots)?;
        let reserved: BTreeSet<u32> = layout.reserved.iter().copied().collect();
        if let Some(bad) = reserved.iter().find(|id| **id == 0 || **id as usize > zones.len()) {
            return Err(Error::Validation(format!(
                "Reserved slot {} is not part of the layout",
                bad
            )));
        }

        let mut core = self.core.lock().await;
        let ids: Vec<u32> = zones.iter().map(|z| z.id).collect();
        core.zones = zones;
        core.machine.reset(ids.iter().copied());
        core.reservations.reset(reserved);
        core.mirror_reservations();

        let mut snapshot = OccupancySnapshot::empty(ids, now);
        snapshot.tick = core.ticks;
        for detail in &mut snapshot.detailed {
            detail.is_reserved = core.reservations.is_reserved(detail.id);
        }
        *self.published.write().await = Arc::new(snapshot);

        tracing::info!(
            slots = core.zones.len(),
            reserved = core.reservations.manual_ids().len(),
            "Slot layout applied"
        );
        Ok(())
    }

    /// Current outlines and manual holds
    pub async fn layout(&self) -> SlotLayout {
        let core = self.core.lock().await;
        SlotLayout {
            slots: core
                .zones
                .iter()
                .map(|z| z.polygon.points().to_vec())
                .collect(),
            reserved: core.reservations.manual_ids(),
        }
    }

    /// Hold a slot for the configured reservation window
    pub async fn reserve(
        &self,
        zone_id: u32,
        booking_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let window = self.settings.read().await.reservation_window_secs;
        let deadline = Duration::try_seconds(window)
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                Error::Validation(format!("Reservation window of {}s is out of range", window))
            })?;
        self.reserve_until(zone_id, deadline, booking_ref, now).await
    }

    /// Hold a slot until `deadline`
    pub async fn reserve_until(
        &self,
        zone_id: u32,
        deadline: DateTime<Utc>,
        booking_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut core = self.core.lock().await;
        core.require_zone(zone_id)?;
        let reservation = core.reservations.reserve(zone_id, deadline, booking_ref, now)?;
        core.mirror_reservations();
        self.republish_reservations(&core, now).await;
        Ok(reservation)
    }

    /// Release whatever hold the slot has
    pub async fn cancel(&self, zone_id: u32, now: DateTime<Utc>) -> Result<ReleasedHold> {
        let mut core = self.core.lock().await;
        core.require_zone(zone_id)?;
        let released = core
            .reservations
            .cancel(zone_id)
            .ok_or_else(|| Error::NotFound(format!("Slot {} has no reservation", zone_id)))?;
        core.mirror_reservations();
        self.republish_reservations(&core, now).await;
        Ok(released)
    }

    /// Flip the manual hold on the slot containing the point
    pub async fn toggle_reserved_at(
        &self,
        point: Point,
        now: DateTime<Utc>,
    ) -> Result<ToggleOutcome> {
        let mut core = self.core.lock().await;
        let zone_id = core
            .zones
            .iter()
            .find(|z| z.polygon.contains(point))
            .map(|z| z.id)
            .ok_or_else(|| Error::NotFound("No slot found here".to_string()))?;

        let reserved = if core.reservations.is_reserved(zone_id) {
            core.reservations.cancel(zone_id);
            false
        } else {
            core.reservations.reserve_manual(zone_id)?;
            true
        };
        core.mirror_reservations();
        self.republish_reservations(&core, now).await;

        Ok(ToggleOutcome { zone_id, reserved })
    }

    /// Timed hold on the slot, if any
    pub async fn reservation(&self, zone_id: u32) -> Option<Reservation> {
        self.core.lock().await.reservations.get(zone_id).cloned()
    }

    /// Refresh reservation fields of the published snapshot between cycles
    async fn republish_reservations(&self, core: &EngineCore, now: DateTime<Utc>) {
        let mut published = self.published.write().await;
        let mut snapshot = (**published).clone();
        for detail in &mut snapshot.detailed {
            detail.is_reserved = core.reservations.is_reserved(detail.id);
            detail.reserved_remaining_secs = core.reservations.remaining_secs(detail.id, now);
        }
        *published = Arc::new(snapshot);
    }
}
