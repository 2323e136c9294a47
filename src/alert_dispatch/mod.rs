//! AlertDispatcher - Downstream fan-out of alert events
//!
//! ## Responsibilities
//!
//! - Accept events from stream workers without blocking them
//! - Persist each event through the datastore
//! - Deliver to every notifier
//! - Re-broadcast to live subscribers
//!
//! Delivery failures are logged and counted, never returned to the worker.
//! The queue is bounded; when delivery falls behind, new events are dropped
//! and counted instead of growing memory.

use crate::alert_state::AlertEvent;
use crate::config_store::Datastore;
use crate::notification::Notifier;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const BROADCAST_CAPACITY: usize = 256;
/// Pending events before `dispatch` starts dropping
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct DispatchCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    notified: AtomicU64,
    notify_failures: AtomicU64,
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub received: u64,
    /// Queue full or dispatcher closed
    pub dropped: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub notified: u64,
    pub notify_failures: u64,
}

/// Cheap-to-clone handle used by workers
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<AlertEvent>,
    broadcast: broadcast::Sender<AlertEvent>,
    counters: Arc<DispatchCounters>,
}

impl AlertDispatcher {
    /// Start the delivery task. It ends once every handle is dropped.
    pub fn spawn(
        datastore: Option<Arc<dyn Datastore>>,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(datastore, notifiers, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(
        datastore: Option<Arc<dyn Datastore>>,
        notifiers: Vec<Arc<dyn Notifier>>,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(queue_capacity.max(1));
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let counters = Arc::new(DispatchCounters::default());

        let task_broadcast = broadcast.clone();
        let task_counters = counters.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(datastore) = &datastore {
                    match datastore.insert_alert_event(&event).await {
                        Ok(row_id) => {
                            task_counters.persisted.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!(camera_id = %event.camera_id, row_id, "Alert persisted");
                        }
                        Err(e) => {
                            task_counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                camera_id = %event.camera_id,
                                metric = %event.metric,
                                error = %e,
                                "Failed to persist alert"
                            );
                        }
                    }
                }

                let results = join_all(notifiers.iter().map(|n| n.notify(&event))).await;
                for (notifier, result) in notifiers.iter().zip(results) {
                    match result {
                        Ok(()) => {
                            task_counters.notified.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            task_counters.notify_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                camera_id = %event.camera_id,
                                notifier = notifier.name(),
                                error = %e,
                                "Alert notification failed"
                            );
                        }
                    }
                }

                // No live subscribers is fine
                let _ = task_broadcast.send(event);
            }

            tracing::info!("Alert dispatcher stopped");
        });

        (
            Self {
                tx,
                broadcast,
                counters,
            },
            handle,
        )
    }

    /// Queue an event for delivery (never blocks)
    pub fn dispatch(&self, event: AlertEvent) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    camera_id = %event.camera_id,
                    metric = %event.metric,
                    "Alert queue full, event dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Alert dispatcher is closed, event dropped");
            }
        }
    }

    /// Live feed of delivered events
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.broadcast.subscribe()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            received: self.counters.received.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            persist_failures: self.counters.persist_failures.load(Ordering::Relaxed),
            notified: self.counters.notified.load(Ordering::Relaxed),
            notify_failures: self.counters.notify_failures.load(Ordering::Relaxed),
        }
    }
}
