//! Fan-out hub: subscriber registry with per-subscriber bounded queues
//!
//! Delivery is best-effort. Each subscription owns a bounded buffer and a
//! publish that finds it full drops the item for that subscriber only, so a
//! stalled consumer never stalls the publisher.

use futures_util::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::domain::{Routable, SubscriptionFilter};

/// Per-subscription buffer capacity unless configured otherwise.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Subscription ids are unique for the life of the process and shared by
/// every hub; they are never reused and reset only on restart.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

struct Subscriber<T> {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<T>,
}

struct HubInner<T> {
    name: &'static str,
    capacity: usize,
    subscribers: Mutex<HashMap<u64, Subscriber<T>>>,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl<T> HubInner<T> {
    fn unregister(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(hub = self.name, subscription_id = id, "Subscription removed");
        }
    }
}

/// In-process publish/subscribe hub for one item type
pub struct FanoutHub<T: Routable> {
    inner: Arc<HubInner<T>>,
}

impl<T: Routable> Clone for FanoutHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Routable> FanoutHub<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                name,
                capacity: capacity.max(1),
                subscribers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber. The returned sequence starts from now and
    /// never replays earlier items; it ends when dropped or on hub shutdown.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription<T> {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        {
            // Checked under the registry lock so a concurrent shutdown
            // cannot miss this entry.
            let mut subscribers = self.inner.subscribers.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                drop(subscribers);
                drop(tx);
                return Subscription {
                    id,
                    rx,
                    hub: Weak::new(),
                };
            }
            subscribers.insert(id, Subscriber { filter: filter.clone(), tx });
        }

        debug!(
            hub = self.inner.name,
            subscription_id = id,
            sensor_id = ?filter.sensor_id,
            site = ?filter.site,
            "Subscription registered"
        );

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Offer `item` to every matching subscriber without blocking.
    ///
    /// Returns the number of subscribers that accepted the item.
    pub fn publish(&self, item: T) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(u64, mpsc::Sender<T>)> = {
            let subscribers = self.inner.subscribers.lock();
            subscribers
                .iter()
                .filter(|(_, sub)| sub.filter.matches(&item))
                .map(|(id, sub)| (*id, sub.tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(hub = self.inner.name, subscription_id = id, "Buffer full, item dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.inner.subscribers.lock();
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// Drop every registration; live sequences end once drained.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let removed = {
            let mut subscribers = self.inner.subscribers.lock();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        debug!(hub = self.inner.name, removed, "Hub shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn published_total(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Deliveries dropped because a subscriber's buffer was full.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

/// Handle to one registered subscriber. Dropping it unregisters.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    hub: Weak<HubInner<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next item, or `None` once the hub has shut down.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}
