//! Registry of live viewers and the fan-out of stock updates to them.
//!
//! Each viewer is a [`Subscriber`]: the sending half of a bounded queue whose
//! receiving half ([`SubscriberInbox`]) is drained by that viewer's connection task.
//! [`SubscriberRegistry::broadcast`] only enqueues, so the exclusive region it holds
//! never waits on a socket. A full or closed queue is a failed write: the subscriber
//! is evicted in the same pass and its inbox sees end-of-stream.
//!
//! The registry is an owned value. Construct one at startup and share it with an
//! `Arc` between the relay and the web layer.

use crate::metrics::RegistryMetrics;
use flash_sale_core::StockUpdateEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a registered viewer, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle the registry writes to.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    outbox: mpsc::Sender<String>,
}

impl Subscriber {
    /// Create a subscriber whose queue holds at most `capacity` pending messages.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, SubscriberInbox) {
        let id = SubscriberId::next();
        let (outbox, inbox) = mpsc::channel(capacity.max(1));
        (Self { id, outbox }, SubscriberInbox { id, inbox })
    }

    /// This subscriber's identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Receiving half owned by the viewer's connection task.
#[derive(Debug)]
pub struct SubscriberInbox {
    id: SubscriberId,
    inbox: mpsc::Receiver<String>,
}

impl SubscriberInbox {
    /// Identifier of the matching [`Subscriber`].
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next JSON payload to write to the viewer.
    ///
    /// Returns `None` once the subscriber has been removed from the registry.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbox.recv().await
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the event was queued for
    pub delivered: usize,
    /// Subscribers evicted during this pass
    pub evicted: usize,
}

/// The set of live viewers.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer.
    pub async fn add(&self, subscriber: Subscriber) -> SubscriberId {
        let id = subscriber.id;
        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(id, subscriber);
        RegistryMetrics::record_size(subscribers.len());
        tracing::debug!(subscriber_id = %id, total = subscribers.len(), "Subscriber added");
        id
    }

    /// Remove a viewer and close its queue. Returns whether it was registered.
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            RegistryMetrics::record_size(subscribers.len());
            tracing::debug!(subscriber_id = %id, total = subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Queue `event` for every viewer, evicting any whose queue is full or closed.
    ///
    /// The whole pass runs under the registry lock; no subscriber is added or
    /// removed concurrently.
    #[tracing::instrument(
        name = "registry.broadcast",
        skip_all,
        fields(product_id = %event.product_id, stock = event.stock)
    )]
    pub async fn broadcast(&self, event: &StockUpdateEvent) -> BroadcastReport {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(error = %error, "Failed to encode stock update");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut subscribers = self.subscribers.lock().await;

        subscribers.retain(|id, subscriber| match subscriber.outbox.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber_id = %id, "Subscriber queue full, evicting");
                report.evicted += 1;
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber_id = %id, "Subscriber gone, evicting");
                report.evicted += 1;
                false
            }
        });

        if report.evicted > 0 {
            RegistryMetrics::record_evicted(report.evicted);
            RegistryMetrics::record_size(subscribers.len());
        }

        report
    }

    /// Number of registered viewers.
    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Whether no viewer is registered.
    pub async fn is_empty(&self) -> bool {
        self.subscribers.lock().await.is_empty()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flash_sale_core::ProductId;

    fn event(stock: i64) -> StockUpdateEvent {
        StockUpdateEvent::new(ProductId::new(1), stock)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let registry = SubscriberRegistry::new();
        let (a, mut inbox_a) = Subscriber::channel(4);
        let (b, mut inbox_b) = Subscriber::channel(4);
        registry.add(a).await;
        registry.add(b).await;

        let report = registry.broadcast(&event(4)).await;

        assert_eq!(report, BroadcastReport { delivered: 2, evicted: 0 });
        let expected = r#"{"product_id":1,"stock":4}"#;
        assert_eq!(inbox_a.recv().await.unwrap(), expected);
        assert_eq!(inbox_b.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn failed_write_evicts_only_that_subscriber() {
        let registry = SubscriberRegistry::new();
        let (healthy, mut healthy_inbox) = Subscriber::channel(4);
        let (broken, broken_inbox) = Subscriber::channel(4);
        registry.add(healthy).await;
        let broken_id = registry.add(broken).await;

        // The connection went away
        drop(broken_inbox);

        let report = registry.broadcast(&event(3)).await;
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert_eq!(registry.len().await, 1);
        assert!(!registry.remove(broken_id).await);

        let report = registry.broadcast(&event(2)).await;
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 0 });
        assert_eq!(healthy_inbox.recv().await.unwrap(), r#"{"product_id":1,"stock":3}"#);
        assert_eq!(healthy_inbox.recv().await.unwrap(), r#"{"product_id":1,"stock":2}"#);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_when_its_queue_fills() {
        let registry = SubscriberRegistry::new();
        let (slow, mut slow_inbox) = Subscriber::channel(1);
        let (fast, mut fast_inbox) = Subscriber::channel(8);
        registry.add(slow).await;
        registry.add(fast).await;

        registry.broadcast(&event(5)).await;
        let report = registry.broadcast(&event(4)).await;

        assert_eq!(report.evicted, 1);
        assert_eq!(registry.len().await, 1);

        // The slow viewer still drains what it was given, then sees the close
        assert_eq!(slow_inbox.recv().await.unwrap(), r#"{"product_id":1,"stock":5}"#);
        assert!(slow_inbox.recv().await.is_none());

        assert!(fast_inbox.recv().await.is_some());
        assert!(fast_inbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn remove_closes_the_inbox() {
        let registry = SubscriberRegistry::new();
        let (subscriber, mut inbox) = Subscriber::channel(4);
        let id = registry.add(subscriber).await;
        assert_eq!(inbox.id(), id);

        assert!(registry.remove(id).await);
        assert!(registry.is_empty().await);
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry_is_a_no_op() {
        let registry = SubscriberRegistry::new();
        assert_eq!(registry.broadcast(&event(1)).await, BroadcastReport::default());
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let (a, _a) = Subscriber::channel(1);
        let (b, _b) = Subscriber::channel(1);
        assert_ne!(a.id(), b.id());
    }
}
