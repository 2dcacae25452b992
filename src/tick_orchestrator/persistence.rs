//! Session event queue and persistence worker
//!
//! The tick only enqueues. A single worker drains the queue in order, so
//! every slot's entry is recorded before its exit, and the receipt follows
//! the exit that produced its record id.

use crate::history_store::SessionRecorder;
use crate::occupancy_state::SessionEvent;
use crate::receipt_generator::{Receipt, ReceiptGenerator};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Upper bound on a single recorder or receipt call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

enum Job {
    Event(SessionEvent),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the bounded session event queue
#[derive(Clone)]
pub struct SessionEventQueue {
    tx: mpsc::Sender<Job>,
    dropped: Arc<AtomicU64>,
}

/// Receiving end, handed to [`spawn_persistence_worker`]
pub struct SessionEventReceiver {
    rx: mpsc::Receiver<Job>,
}

impl SessionEventQueue {
    /// Create a queue with the given capacity (at least 1)
    pub fn bounded(capacity: usize) -> (Self, SessionEventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            SessionEventReceiver { rx },
        )
    }

    /// Enqueue without waiting. Returns false if the event was dropped.
    pub fn enqueue(&self, event: SessionEvent) -> bool {
        match self.tx.try_send(Job::Event(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Session event queue full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Persistence worker stopped, event dropped");
                false
            }
        }
    }

    /// Wait until every event enqueued before this call has been handled.
    ///
    /// Returns immediately if the worker is gone.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Events dropped since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn bounded_call<T, F>(call_timeout: Duration, what: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = crate::error::Result<T>>,
{
    match tokio::time::timeout(call_timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!(call = what, error = %e, "Persistence call failed");
            None
        }
        Err(_) => {
            tracing::error!(
                call = what,
                timeout_ms = call_timeout.as_millis() as u64,
                "Persistence call timed out"
            );
            None
        }
    }
}

async fn handle_event(
    event: SessionEvent,
    recorder: &dyn SessionRecorder,
    receipts: &dyn ReceiptGenerator,
    call_timeout: Duration,
) {
    match event {
        SessionEvent::Entry { zone_id, at } => {
            bounded_call(call_timeout, "log_entry", recorder.log_entry(zone_id, at)).await;
        }
        SessionEvent::Exit {
            zone_id,
            entry_time,
            exit_time,
            duration_secs,
            fee,
        } => {
            let logged = bounded_call(
                call_timeout,
                "log_exit",
                recorder.log_exit(zone_id, duration_secs, fee, exit_time),
            )
            .await;
            let record_id = match logged {
                Some(Some(id)) => id,
                Some(None) => {
                    tracing::warn!(
                        zone_id = zone_id,
                        "No open history record for exit, receipt skipped"
                    );
                    return;
                }
                None => return,
            };

            let receipt =
                Receipt::new(record_id, zone_id, entry_time, exit_time, duration_secs, fee);
            bounded_call(call_timeout, "receipt", receipts.generate(&receipt)).await;
        }
    }
}

/// Start the single worker that records session events and writes receipts
pub fn spawn_persistence_worker(
    receiver: SessionEventReceiver,
    recorder: Arc<dyn SessionRecorder>,
    receipts: Arc<dyn ReceiptGenerator>,
    call_timeout: Duration,
) -> JoinHandle<()> {
    let mut rx = receiver.rx;
    tokio::spawn(async move {
        tracing::debug!("Persistence worker started");
        while let Some(job) = rx.recv().await {
            match job {
                Job::Event(event) => {
                    handle_event(event, recorder.as_ref(), receipts.as_ref(), call_timeout).await
                }
                Job::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Persistence worker stopped");
    })
}
