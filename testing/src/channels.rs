//! In-memory order and broadcast channels.

use async_stream::stream;
use flash_sale_core::{
    BroadcastChannel, BroadcastError, ChannelError, Delivery, DeliveryStream, IntentSource,
    OrderChannel, OrderIntent, Settlement, StockUpdateEvent, StockUpdateStream,
};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<(OrderIntent, u32)>,
    enqueued: Vec<OrderIntent>,
    acked: Vec<Uuid>,
    nacked: Vec<Uuid>,
    in_flight: usize,
}

#[derive(Debug, Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
    failing: AtomicBool,
    failing_consumes: AtomicUsize,
    enqueue_delay: Mutex<Option<Duration>>,
}

impl QueueInner {
    fn settle(&self, intent: OrderIntent, attempt: u32, settlement: Option<Settlement>) {
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            match settlement {
                Some(Settlement::Ack) => state.acked.push(intent.intent_id),
                Some(Settlement::Nack) => {
                    state.nacked.push(intent.intent_id);
                    state.pending.push_back((intent, attempt + 1));
                }
                // Unsettled: back to the queue without counting an attempt
                None => state.pending.push_front((intent, attempt)),
            }
        }
        self.notify.notify_waiters();
    }
}

/// At-least-once queue shared by producers and consumers in one process.
///
/// - Several [`consume`](IntentSource::consume) streams share one queue.
/// - A nacked delivery is requeued with its attempt count incremented.
/// - A delivery dropped without settlement is requeued unchanged.
/// - After [`close`](Self::close), streams end once the queue is empty and no
///   delivery is in flight.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderChannel {
    inner: Arc<QueueInner>,
}

impl InMemoryOrderChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make enqueues fail with [`ChannelError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `consume` fail.
    pub fn fail_next_consumes(&self, count: usize) {
        self.inner.failing_consumes.store(count, Ordering::SeqCst);
    }

    /// Delay every enqueue by `delay` (to exercise caller timeouts).
    pub fn set_enqueue_delay(&self, delay: Option<Duration>) {
        *self.inner.enqueue_delay.lock().unwrap() = delay;
    }

    /// Let consumers finish once the queue drains.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Every intent successfully enqueued.
    #[must_use]
    pub fn enqueued(&self) -> Vec<OrderIntent> {
        self.inner.state.lock().unwrap().enqueued.clone()
    }

    /// Intents acknowledged, in settlement order.
    #[must_use]
    pub fn acked(&self) -> Vec<Uuid> {
        self.inner.state.lock().unwrap().acked.clone()
    }

    /// Intents negatively acknowledged, once per nack.
    #[must_use]
    pub fn nacked(&self) -> Vec<Uuid> {
        self.inner.state.lock().unwrap().nacked.clone()
    }

    /// Deliveries waiting to be consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Whether every enqueued intent has been settled for good.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.pending.is_empty() && state.in_flight == 0
    }

    /// Put an intent on the queue as if it had been delivered `attempt - 1` times already.
    pub fn push_delivery(&self, intent: OrderIntent, attempt: u32) {
        self.inner
            .state
            .lock()
            .unwrap()
            .pending
            .push_back((intent, attempt));
        self.inner.notify.notify_waiters();
    }

    fn next_delivery(inner: &Arc<QueueInner>) -> Option<Delivery> {
        let (intent, attempt) = {
            let mut state = inner.state.lock().unwrap();
            let next = state.pending.pop_front()?;
            state.in_flight += 1;
            next
        };

        let (delivery, settled) = Delivery::new(intent.clone(), attempt);
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let settlement = settled.await.ok();
            inner.settle(intent, attempt, settlement);
        });
        Some(delivery)
    }
}

impl OrderChannel for InMemoryOrderChannel {
    fn enqueue<'a>(&'a self, intent: &'a OrderIntent) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            let delay = *self.inner.enqueue_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.inner.failing.load(Ordering::SeqCst) {
                return Err(ChannelError::Unavailable("injected failure".to_string()));
            }
            self.push_delivery(intent.clone(), 1);
            self.inner.state.lock().unwrap().enqueued.push(intent.clone());
            Ok(())
        })
    }
}

impl IntentSource for InMemoryOrderChannel {
    fn consume(&self) -> BoxFuture<'_, Result<DeliveryStream, ChannelError>> {
        Box::pin(async move {
            let failing = self.inner.failing_consumes.load(Ordering::SeqCst);
            if failing > 0 {
                self.inner.failing_consumes.store(failing - 1, Ordering::SeqCst);
                return Err(ChannelError::Transport("injected failure".to_string()));
            }

            let inner = Arc::clone(&self.inner);
            let deliveries: DeliveryStream = Box::pin(stream! {
                loop {
                    let notified = inner.notify.notified();
                    if let Some(delivery) = InMemoryOrderChannel::next_delivery(&inner) {
                        yield Ok(delivery);
                        continue;
                    }
                    let idle = inner.state.lock().unwrap().in_flight == 0;
                    if idle && inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    notified.await;
                }
            });
            Ok(deliveries)
        })
    }
}

/// Process-local pub/sub on a `tokio::sync::broadcast` channel.
///
/// Events published while nobody is subscribed are dropped, as with a real broker.
#[derive(Clone, Debug)]
pub struct InMemoryBroadcastChannel {
    sender: Arc<Mutex<broadcast::Sender<StockUpdateEvent>>>,
    published: Arc<Mutex<Vec<StockUpdateEvent>>>,
    failing_publishes: Arc<AtomicBool>,
    failing_subscribes: Arc<AtomicUsize>,
    subscribe_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryBroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroadcastChannel {
    /// Create a channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender: Arc::new(Mutex::new(sender)),
            published: Arc::new(Mutex::new(Vec::new())),
            failing_publishes: Arc::new(AtomicBool::new(false)),
            failing_subscribes: Arc::new(AtomicUsize::new(0)),
            subscribe_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make publishes fail.
    pub fn set_publish_failing(&self, failing: bool) {
        self.failing_publishes.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` subscriptions fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// End every open subscription, as a broker restart would.
    pub fn drop_subscriptions(&self) {
        let (sender, _) = broadcast::channel(256);
        *self.sender.lock().unwrap() = sender;
    }

    /// Events published successfully.
    #[must_use]
    pub fn published(&self) -> Vec<StockUpdateEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.lock().unwrap().receiver_count()
    }

    /// Calls made to `subscribe`, failed ones included.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl BroadcastChannel for InMemoryBroadcastChannel {
    fn publish<'a>(
        &'a self,
        event: &'a StockUpdateEvent,
    ) -> BoxFuture<'a, Result<(), BroadcastError>> {
        Box::pin(async move {
            if self.failing_publishes.load(Ordering::SeqCst) {
                return Err(BroadcastError::PublishFailed("injected failure".to_string()));
            }
            self.published.lock().unwrap().push(*event);
            // No receivers is not an error for fire-and-forget pub/sub
            let _ = self.sender.lock().unwrap().send(*event);
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<StockUpdateStream, BroadcastError>> {
        Box::pin(async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self.failing_subscribes.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_subscribes.store(failing - 1, Ordering::SeqCst);
                return Err(BroadcastError::Unavailable("injected failure".to_string()));
            }

            let mut receiver = self.sender.lock().unwrap().subscribe();
            let events: StockUpdateStream = Box::pin(stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield event,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(events)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flash_sale_core::{BuyerId, ProductId};
    use futures::StreamExt;

    fn intent() -> OrderIntent {
        OrderIntent::new(BuyerId::new(1), ProductId::new(1), Utc::now())
    }

    #[tokio::test]
    async fn nacked_delivery_comes_back_with_next_attempt() {
        let channel = InMemoryOrderChannel::new();
        channel.enqueue(&intent()).await.unwrap();
        let mut deliveries = channel.consume().await.unwrap();

        let first = deliveries.next().await.unwrap().unwrap();
        assert_eq!(first.attempt(), 1);
        first.nack();

        let second = deliveries.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        second.ack();

        channel.close();
        assert!(deliveries.next().await.is_none());
        assert_eq!(channel.acked().len(), 1);
        assert_eq!(channel.nacked().len(), 1);
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered_unchanged() {
        let channel = InMemoryOrderChannel::new();
        channel.enqueue(&intent()).await.unwrap();
        let mut deliveries = channel.consume().await.unwrap();

        drop(deliveries.next().await.unwrap().unwrap());

        let again = deliveries.next().await.unwrap().unwrap();
        assert_eq!(again.attempt(), 1);
        again.ack();
    }

    #[tokio::test]
    async fn failing_enqueue_leaves_queue_empty() {
        let channel = InMemoryOrderChannel::new();
        channel.set_failing(true);
        assert!(channel.enqueue(&intent()).await.is_err());
        assert_eq!(channel.pending(), 0);
        assert!(channel.enqueued().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_and_drops_when_nobody_listens() {
        let channel = InMemoryBroadcastChannel::new();
        let event = StockUpdateEvent::new(ProductId::new(1), 3);
        channel.publish(&event).await.unwrap();

        let mut updates = channel.subscribe().await.unwrap();
        channel.publish(&StockUpdateEvent::new(ProductId::new(1), 2)).await.unwrap();

        assert_eq!(updates.next().await.unwrap().stock, 2);
        assert_eq!(channel.published().len(), 2);
    }

    #[tokio::test]
    async fn dropped_subscriptions_end_their_streams() {
        let channel = InMemoryBroadcastChannel::new();
        let mut updates = channel.subscribe().await.unwrap();
        channel.drop_subscriptions();
        assert!(updates.next().await.is_none());
    }
}
