//! Slotwatch - Parking slot occupancy server
//!
//! Main entry point for the slotwatch application.

use slotwatch::{
    alert_dispatcher::{spawn_workers, NotificationQueue},
    booking_service::BookingService,
    detector::{Detector, HttpDetector},
    history_store::HistoryRepository,
    notification::{LogTransport, NotificationTransport, TelegramTransport},
    receipt_generator::FileReceiptGenerator,
    slot_layout::SlotLayoutStore,
    state::{AppConfig, AppState},
    tick_orchestrator::{
        spawn_persistence_worker, EngineCollaborators, ParkingEngine, SessionEventQueue,
        DEFAULT_CALL_TIMEOUT, MAX_WINDOW_SECS,
    },
    web_api,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotwatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting slotwatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        detector_url = ?config.detector_url,
        receipt_dir = %config.receipt_dir.display(),
        slot_layout_file = %config.slot_layout_file.display(),
        "Configuration loaded"
    );

    // History database
    let history = HistoryRepository::connect(&config.database_url).await?;
    tracing::info!("History database ready");

    // Notification transport + workers
    let transport: Arc<dyn NotificationTransport> =
        match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) => {
                Arc::new(TelegramTransport::new(token.clone(), chat_id.clone())?)
            }
            _ => {
                tracing::warn!("Telegram credentials not set, notifications will only be logged");
                Arc::new(LogTransport)
            }
        };
    let (queue, rx) = NotificationQueue::bounded(config.notify_queue_capacity);
    spawn_workers(rx, transport.clone(), config.notify_workers);
    tracing::info!(
        transport = transport.name(),
        workers = config.notify_workers,
        capacity = config.notify_queue_capacity,
        "Notification workers started"
    );

    let detector: Option<Arc<dyn Detector>> = match &config.detector_url {
        Some(url) => Some(Arc::new(HttpDetector::new(url.clone())?)),
        None => {
            tracing::warn!("DETECTOR_URL not set, only pre-computed detections are accepted");
            None
        }
    };

    let receipts = Arc::new(FileReceiptGenerator::new(config.receipt_dir.clone()));

    // Persistence worker
    let (events, events_rx) = SessionEventQueue::bounded(config.persist_queue_capacity);
    spawn_persistence_worker(
        events_rx,
        Arc::new(history.clone()),
        receipts.clone(),
        DEFAULT_CALL_TIMEOUT,
    );
    tracing::info!(
        capacity = config.persist_queue_capacity,
        "Persistence worker started"
    );

    // Engine
    let engine = Arc::new(ParkingEngine::new(
        config.engine.clone(),
        EngineCollaborators {
            events,
            detector,
            queue,
        },
    )?);

    // Restore the active source's layout
    let layouts = Arc::new(SlotLayoutStore::open(config.slot_layout_file.clone()).await?);
    let source = layouts.active_source().await;
    let layout = layouts.load(&source).await;
    if let Err(e) = engine.apply_layout(&layout, Utc::now()).await {
        tracing::error!(
            source_id = %source,
            error = %e,
            "Saved layout is invalid, starting without slots"
        );
    }

    let bookings = Arc::new(BookingService::new(engine.clone()));

    let state = AppState {
        engine,
        history: history.clone(),
        receipts: receipts.clone(),
        layouts,
        bookings,
        started_at: Instant::now(),
    };

    // Start history retention task
    let history_retention = config
        .history_retention_secs
        .filter(|secs| (1..=MAX_WINDOW_SECS).contains(secs));
    if history_retention != config.history_retention_secs {
        tracing::warn!(
            retention_secs = ?config.history_retention_secs,
            "HISTORY_RETENTION_SECS out of range, history retention disabled"
        );
    }
    if let Some(retention) = history_retention {
        let history_cleanup = history.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = history_cleanup
                    .cleanup_completed_older_than(retention, Utc::now())
                    .await
                {
                    tracing::error!(error = %e, "Failed to clean up history");
                }
            }
        });
        tracing::info!(retention_secs = retention, "History retention enabled");
    }

    // Start receipt retention task
    if let Some(retention) = config.receipt_retention_secs {
        let receipt_cleanup = receipts.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = receipt_cleanup
                    .prune_older_than(Duration::from_secs(retention))
                    .await
                {
                    tracing::error!(error = %e, "Failed to prune receipts");
                }
            }
        });
        tracing::info!(retention_secs = retention, "Receipt retention enabled");
    }

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
