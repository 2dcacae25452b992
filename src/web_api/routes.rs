//! API Routes

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::booking_service::BookingRequest;
use crate::detector::DetectorBox;
use crate::frame_classifier::Detection;
use crate::history_store::DEFAULT_RECENT_LIMIT;
use crate::models::ApiResponse;
use crate::reservation_manager::ReleasedHold;
use crate::slot_layout::SlotLayout;
use crate::state::AppState;
use crate::tick_orchestrator::SettingsUpdate;
use crate::zone_geometry::Point;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Occupancy
        .route("/api/stats", get(get_stats))
        .route("/api/detections", post(submit_detections))
        .route("/api/frames", post(submit_frame))
        // Layout
        .route("/api/slots", get(get_slots).put(put_slots))
        .route("/api/slots/toggle-reserved", post(toggle_reserved))
        .route("/api/source", post(select_source))
        // Settings
        .route("/api/settings", get(get_settings).put(put_settings))
        // Bookings & reservations
        .route("/api/bookings", get(list_bookings).post(submit_booking))
        .route("/api/bookings/verify", post(verify_booking))
        .route("/api/reservations/:slot_id", delete(cancel_reservation))
        // History
        .route("/api/history", get(list_history).delete(clear_history))
        .route("/api/receipts/:record_id", get(get_receipt))
        .with_state(state)
}

// ========================================
// Occupancy
// ========================================

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot().await;
    Json(snapshot.as_ref().clone())
}

#[derive(Debug, Deserialize)]
struct DetectionsRequest {
    #[serde(default)]
    boxes: Vec<DetectorBox>,
}

async fn submit_detections(
    State(state): State<AppState>,
    Json(req): Json<DetectionsRequest>,
) -> impl IntoResponse {
    let detections: Vec<Detection> = req.boxes.into_iter().map(Detection::from).collect();
    let snapshot = state.engine.tick(Utc::now(), &detections).await;
    Json(snapshot.as_ref().clone())
}

async fn submit_frame(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match state.engine.process_frame(body.to_vec(), Utc::now()).await {
        Ok(snapshot) => Json(snapshot.as_ref().clone()).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Layout
// ========================================

async fn get_slots(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.layout().await)
}

async fn put_slots(
    State(state): State<AppState>,
    Json(layout): Json<SlotLayout>,
) -> impl IntoResponse {
    if let Err(e) = state.engine.apply_layout(&layout, Utc::now()).await {
        return e.into_response();
    }
    match state.layouts.save_active(layout).await {
        Ok(()) => Json(json!({"ok": true, "message": "Saved"})).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SelectSourceRequest {
    source_id: String,
}

async fn select_source(
    State(state): State<AppState>,
    Json(req): Json<SelectSourceRequest>,
) -> impl IntoResponse {
    let layout = state.layouts.load(&req.source_id).await;
    let has_saved_slots = !layout.slots.is_empty();

    // The active source only moves once its layout is live in the engine
    match state.engine.apply_layout(&layout, Utc::now()).await {
        Ok(()) => {
            state.layouts.select(&req.source_id).await;
            tracing::info!(
                source_id = %req.source_id,
                slots = layout.slots.len(),
                "Source selected"
            );
            Json(json!({
                "ok": true,
                "source_id": req.source_id,
                "has_saved_slots": has_saved_slots,
            }))
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ToggleReservedRequest {
    x: f64,
    y: f64,
}

async fn toggle_reserved(
    State(state): State<AppState>,
    Json(req): Json<ToggleReservedRequest>,
) -> impl IntoResponse {
    let point = Point::new(req.x, req.y);
    let outcome = match state.engine.toggle_reserved_at(point, Utc::now()).await {
        Ok(outcome) => outcome,
        Err(e) => return e.into_response(),
    };

    let layout = state.engine.layout().await;
    if let Err(e) = state.layouts.save_active(layout).await {
        tracing::error!(error = %e, "Failed to persist manual reservation");
    }

    let message = if outcome.reserved {
        format!("Slot {} marked as RESERVED", outcome.zone_id)
    } else {
        format!("Slot {} un-reserved", outcome.zone_id)
    };
    Json(json!({"ok": true, "message": message, "data": outcome})).into_response()
}

// ========================================
// Settings
// ========================================

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.engine.settings().await))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    match state.engine.update_settings(&update).await {
        Ok(settings) => Json(ApiResponse::success(settings)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Bookings & reservations
// ========================================

async fn submit_booking(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> impl IntoResponse {
    match state.bookings.submit(req, Utc::now()).await {
        Ok(booking) => Json(ApiResponse::success(booking)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_bookings(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.bookings.list().await))
}

#[derive(Debug, Deserialize)]
struct VerifyBookingRequest {
    booking_id: String,
}

async fn verify_booking(
    State(state): State<AppState>,
    Json(req): Json<VerifyBookingRequest>,
) -> impl IntoResponse {
    match state.bookings.verify(&req.booking_id).await {
        Ok(booking) => Json(ApiResponse::success(booking)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Path(slot_id): Path<u32>,
) -> impl IntoResponse {
    match state.bookings.cancel_reservation(slot_id, Utc::now()).await {
        Ok(ReleasedHold::Manual) => {
            let layout = state.engine.layout().await;
            if let Err(e) = state.layouts.save_active(layout).await {
                tracing::error!(error = %e, "Failed to persist manual reservation");
            }
            Json(json!({"ok": true, "slot_id": slot_id, "released": "manual"})).into_response()
        }
        Ok(ReleasedHold::Timed(reservation)) => Json(json!({
            "ok": true,
            "slot_id": slot_id,
            "released": "timed",
            "booking_ref": reservation.booking_ref,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// History
// ========================================

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
    #[serde(default)]
    all: bool,
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let result = if query.all {
        state.history.fetch_all().await
    } else {
        let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, 1000);
        state.history.fetch_recent(limit).await
    };

    match result {
        Ok(records) => Json(ApiResponse::success(records)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn clear_history(State(state): State<AppState>) -> impl IntoResponse {
    match state.history.clear_all().await {
        Ok(deleted) => Json(json!({"ok": true, "deleted": deleted})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_receipt(
    State(state): State<AppState>,
    Path(record_id): Path<i64>,
) -> impl IntoResponse {
    match state.receipts.read(record_id).await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => e.into_response(),
    }
}
