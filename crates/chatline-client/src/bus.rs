//! Multicast event channel that replays recent events to late subscribers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::warn;

struct Inner<T> {
    recent: VecDeque<T>,
    capacity: usize,
    tx: broadcast::Sender<T>,
}

/// A `broadcast` channel plus a ring of the last `capacity` events.
///
/// Publishing and subscribing both happen under one lock, so a new
/// subscriber sees every event exactly once: first the replayed ones, then
/// the live ones. A subscriber more than `capacity` events behind skips
/// ahead; consumers that must see everything read from a queue instead.
pub struct ReplayBus<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ReplayBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ReplayBus<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                recent: VecDeque::with_capacity(capacity),
                capacity,
                tx,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, event: T) {
        let mut inner = self.lock();
        if inner.recent.len() == inner.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(event.clone());
        // Nobody listening is fine; the ring still keeps the event.
        let _ = inner.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let inner = self.lock();
        Subscription {
            backlog: inner.recent.clone(),
            rx: inner.tx.subscribe(),
        }
    }
}

/// Receiving end of a [`ReplayBus`].
pub struct Subscription<T> {
    backlog: VecDeque<T>,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Next event, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
