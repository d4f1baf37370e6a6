// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fan-out to subscribed connections.
//!
//! Each subscriber owns a bounded queue. Delivery order per subscriber
//! matches emission order; a subscriber whose queue fills up is dropped
//! and its connection closed rather than allowed to block anyone else.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gob_core::Event;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bounded queue depth per subscriber. Deep enough to ride out a bulk
/// removal burst; a reader further behind than this is dead weight.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

/// A registered subscriber's receiving end.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<Event>>,
}

struct Subscriber {
    id: u64,
    filter: Option<PathBuf>,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Fan-out point between the manager and connection handlers.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with an optional workdir filter.
    pub fn subscribe(&self, filter: Option<PathBuf>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.subscribers.lock().push(Subscriber { id, filter, tx });
        debug!(subscriber = id, "subscribed");
        Subscription { id, rx }
    }

    /// Drop a subscriber (connection handler exit).
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Uses `try_send` so a slow reader can never block the pump; on a
    /// full or closed queue the subscriber is removed, which closes its
    /// connection.
    pub fn publish(&self, event: Event) {
        let event = Arc::new(event);
        self.subscribers.lock().retain(|subscriber| {
            if !event.matches_workdir(subscriber.filter.as_deref()) {
                return true;
            }
            match subscriber.tx.try_send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = subscriber.id,
                        "subscriber queue full, dropping subscriber"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Pump manager events into the broadcaster.
///
/// A single task drains the channel, so per-subscriber delivery order is
/// exactly emission order.
pub fn spawn_event_pump(
    mut rx: mpsc::UnboundedReceiver<Event>,
    broadcaster: Arc<Broadcaster>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            broadcaster.publish(event);
        }
    })
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
