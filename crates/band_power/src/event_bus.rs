//! Replay-last snapshot broadcast
//!
//! A retained "current value" plus a subscriber list. New subscribers get the
//! latest snapshot first and then every later publish, in publish order.
//!
//! Subscriber queues are unbounded: the engine publishes a few snapshots per
//! second, and dropping one would break the "every subsequent publish"
//! contract. Subscribers whose receiving side is gone are pruned on the next
//! publish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use eeg_types::PowerSnapshot;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    name: String,
    sender: mpsc::UnboundedSender<Arc<PowerSnapshot>>,
}

#[derive(Debug, Default)]
struct BusState {
    subscribers: Vec<Subscriber>,
    latest: Option<Arc<PowerSnapshot>>,
    next_id: u64,
    metrics: BusMetrics,
}

/// Broadcast counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BusMetrics {
    /// Total snapshots published
    pub published: u64,
    /// Total deliveries, including replays to new subscribers
    pub delivered: u64,
    pub dead_subscribers_removed: u64,
    pub active_subscribers: usize,
}

/// Receiving end of a bus subscription.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Arc<PowerSnapshot>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next snapshot. `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Arc<PowerSnapshot>> {
        self.receiver.recv().await
    }

    /// Next queued snapshot, if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Arc<PowerSnapshot>> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBus {
    state: Mutex<BusState>,
}

impl SnapshotBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the latest snapshot, if any, is queued immediately.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();

        let id = state.next_id;
        state.next_id += 1;

        // Replay and registration happen under one lock, so a concurrent
        // publish is seen either as the replay or as a live delivery, never both
        if let Some(latest) = state.latest.clone() {
            if sender.send(latest).is_ok() {
                state.metrics.delivered += 1;
            }
        }

        state.subscribers.push(Subscriber {
            id,
            name: name.clone(),
            sender,
        });
        state.metrics.active_subscribers = state.subscribers.len();

        debug!(subscriber = %name, id, "New snapshot subscriber registered");
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut state = self.lock();
        if let Some(pos) = state.subscribers.iter().position(|s| s.id == subscription.id) {
            let removed = state.subscribers.remove(pos);
            debug!(subscriber = %removed.name, id = removed.id, "Subscriber removed");
        }
        state.metrics.active_subscribers = state.subscribers.len();
    }

    /// Retain `snapshot` as the latest value and deliver it to every subscriber.
    pub fn publish(&self, snapshot: Arc<PowerSnapshot>) {
        let mut state = self.lock();
        state.latest = Some(snapshot.clone());
        state.metrics.published += 1;

        let before = state.subscribers.len();
        let mut delivered = 0;
        state.subscribers.retain(|subscriber| {
            if subscriber.sender.send(snapshot.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(subscriber = %subscriber.name, "Subscriber channel closed, removing");
                false
            }
        });

        let removed = before - state.subscribers.len();
        state.metrics.delivered += delivered;
        state.metrics.dead_subscribers_removed += removed as u64;
        state.metrics.active_subscribers = state.subscribers.len();
    }

    pub fn latest(&self) -> Option<Arc<PowerSnapshot>> {
        self.lock().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn metrics(&self) -> BusMetrics {
        self.lock().metrics.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
