//! Notification queue and worker pool
//!
//! The tick loop only ever enqueues. Workers own delivery; a slow or failing
//! transport never holds up a tick.

use super::types::Outbound;
use crate::notification::NotificationTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Cloneable handle to the bounded notification queue
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Outbound>,
    dropped: Arc<AtomicU64>,
}

impl NotificationQueue {
    /// Create a queue with the given capacity (at least 1)
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue without waiting. Returns false if the message was dropped.
    pub fn enqueue(&self, message: Outbound) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    text = message.text(),
                    "Notification queue full, message dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    text = message.text(),
                    "Notification workers stopped, message dropped"
                );
                false
            }
        }
    }

    /// Messages dropped since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Start `workers` tasks draining the queue into the transport
pub fn spawn_workers(
    rx: mpsc::Receiver<Outbound>,
    transport: Arc<dyn NotificationTransport>,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));

    (0..workers.max(1))
        .map(|worker_id| {
            let rx = rx.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                tracing::debug!(
                    worker_id = worker_id,
                    transport = transport.name(),
                    "Notification worker started"
                );
                loop {
                    // Lock is released before the send so other workers keep draining
                    let next = rx.lock().await.recv().await;
                    let Some(message) = next else {
                        break;
                    };

                    match transport.send(message.recipient(), message.text()).await {
                        Ok(()) => {
                            tracing::info!(
                                worker_id = worker_id,
                                transport = transport.name(),
                                "Notification delivered"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                worker_id = worker_id,
                                transport = transport.name(),
                                error = %e,
                                "Notification delivery failed"
                            );
                        }
                    }
                }
                tracing::debug!(worker_id = worker_id, "Notification worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;

    struct Recording {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationTransport for Recording {
        async fn send(&self, chat_id: Option<&str>, message: &str) -> Result<()> {
            let to = chat_id.unwrap_or("operator");
            self.sent.lock().await.push(format!("{}: {}", to, message));
            if self.fail {
                return Err(Error::Notification("down".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn booking(text: &str) -> Outbound {
        Outbound::BookingConfirmation {
            booking_id: "12345".to_string(),
            chat_id: "5550101".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (queue, _rx) = NotificationQueue::bounded(1);
        assert!(queue.enqueue(booking("a")));
        assert!(!queue.enqueue(booking("b")));
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_workers_deliver_and_survive_failures() {
        let transport = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let (queue, rx) = NotificationQueue::bounded(8);
        queue.enqueue(booking("one"));
        queue.enqueue(booking("two"));
        drop(queue);

        let handles = spawn_workers(rx, transport.clone(), 2);
        for handle in handles {
            handle.await.unwrap();
        }

        let mut sent = transport.sent.lock().await.clone();
        sent.sort();
        assert_eq!(sent, vec!["5550101: one", "5550101: two"]);
    }
}
