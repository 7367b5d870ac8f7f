//! Progress event bus.
//!
//! Single-writer, multi-reader fan-out of typed upload progress events.
//! Every subscriber gets its own bounded channel; a full buffer drops the
//! event for that subscriber only. Publishers never block.

use crate::metrics::Metrics;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Milliseconds since epoch, the timestamp unit on every event.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Typed progress events. Each carries enough context to drive a UI update
/// without consulting other components.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    UploadStart {
        filename: String,
        object_key: String,
        total_size: u64,
        timestamp_ms: i64,
    },
    ChunkProgress {
        session_id: String,
        filename: String,
        bytes_transferred: u64,
        total_size: u64,
        percent: f64,
        speed_bps: f64,
        eta_seconds: f64,
        timestamp_ms: i64,
    },
    SessionProgress {
        session_id: String,
        filename: String,
        status: String,
        offset: u64,
        total_size: u64,
        timestamp_ms: i64,
    },
    IntegrityResult {
        object_key: String,
        expected: String,
        actual: String,
        passed: bool,
        timestamp_ms: i64,
    },
    QualityAlert {
        object_key: String,
        message: String,
        timestamp_ms: i64,
    },
    Completion {
        object_key: String,
        filename: String,
        size: u64,
        file_hash: String,
        timestamp_ms: i64,
    },
    Error {
        context: String,
        kind: String,
        message: String,
        timestamp_ms: i64,
    },
}

/// A registered subscriber's receive side. Dropping it closes the channel;
/// the bus prunes the dead sender on the next publish.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<ProgressEvent>,
}

/// Bounded fan-out bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<ProgressEvent>>>,
    next_id: AtomicU64,
    max_subscribers: usize,
    buffer_size: usize,
    dropped: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl EventBus {
    pub fn new(max_subscribers: usize, buffer_size: usize, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            max_subscribers,
            buffer_size,
            dropped: AtomicU64::new(0),
            metrics,
        }
    }

    /// Register a subscriber. Returns `None` when the subscriber cap is
    /// reached — the caller turns that into a service-busy response.
    pub fn subscribe(&self) -> Option<Subscription> {
        let mut subscribers = self.subscribers.write();
        if subscribers.len() >= self.max_subscribers {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.buffer_size);
        subscribers.insert(id, tx);
        debug!("Event subscriber {} registered ({} active)", id, subscribers.len());
        Some(Subscription { id, receiver: rx })
    }

    /// Remove a subscriber explicitly.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Events dropped on full subscriber buffers since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Fan the event out to every subscriber. Full buffers drop the event
    /// for that subscriber; closed channels unregister the subscriber.
    /// Never blocks.
    pub fn publish(&self, event: ProgressEvent) {
        let senders: Vec<(u64, mpsc::Sender<ProgressEvent>)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut closed = Vec::new();
        for (id, tx) in senders {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    if let Some(m) = &self.metrics {
                        m.events_dropped_total.inc();
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
                debug!("Event subscriber {} unregistered (channel closed)", id);
            }
        }
    }
}
