//! In-memory stores: stock counter, ledger and dead-letter sink.
//!
//! Each store keeps its state behind a `std::sync::Mutex` that is never held
//! across an `.await`, and exposes synchronous accessors for assertions.

use flash_sale_core::{
    CommitOutcome, CommittedOrder, CounterError, DeadLetter, DeadLetterError, DeadLetterSink,
    DurableLedger, LedgerError, Order, OrderId, OrderIntent, Product, ProductId, StockCounter,
};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Atomic counter map with switchable unavailability.
///
/// Every operation yields to the scheduler once before touching the map, so
/// concurrent callers interleave the way they would against a remote store.
///
/// # Example
///
/// ```
/// use flash_sale_core::{ProductId, StockCounter};
/// use flash_sale_testing::InMemoryStockCounter;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let counter = InMemoryStockCounter::new().with_stock(ProductId::new(1), 2);
/// assert_eq!(counter.decrement(ProductId::new(1)).await?, 1);
/// assert_eq!(counter.value(ProductId::new(1)), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStockCounter {
    values: Arc<Mutex<HashMap<ProductId, i64>>>,
    unavailable: Arc<AtomicBool>,
    min_observed: Arc<Mutex<HashMap<ProductId, i64>>>,
}

impl InMemoryStockCounter {
    /// Create an empty counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `product_id` with `stock`.
    #[must_use]
    pub fn with_stock(self, product_id: ProductId, stock: i64) -> Self {
        self.values.lock().unwrap().insert(product_id, stock);
        self
    }

    /// Make every operation fail with [`CounterError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current value (`0` when absent).
    #[must_use]
    pub fn value(&self, product_id: ProductId) -> i64 {
        self.values.lock().unwrap().get(&product_id).copied().unwrap_or(0)
    }

    /// Lowest value the counter has held since creation.
    #[must_use]
    pub fn min_observed(&self, product_id: ProductId) -> i64 {
        let min = self.min_observed.lock().unwrap().get(&product_id).copied();
        min.unwrap_or_else(|| self.value(product_id))
    }

    async fn apply<T>(
        &self,
        product_id: ProductId,
        op: impl FnOnce(&mut i64) -> T,
    ) -> Result<T, CounterError> {
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CounterError::Unavailable("injected failure".to_string()));
        }

        let mut values = self.values.lock().unwrap();
        let value = values.entry(product_id).or_insert(0);
        let result = op(value);

        let current = *value;
        let mut min_observed = self.min_observed.lock().unwrap();
        let min = min_observed.entry(product_id).or_insert(current);
        *min = (*min).min(current);

        Ok(result)
    }
}

impl StockCounter for InMemoryStockCounter {
    fn decrement(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>> {
        Box::pin(self.apply(product_id, |value| {
            *value -= 1;
            *value
        }))
    }

    fn increment(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>> {
        Box::pin(self.apply(product_id, |value| {
            *value += 1;
            *value
        }))
    }

    fn decrement_if_available(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<i64>, CounterError>> {
        Box::pin(self.apply(product_id, |value| {
            if *value > 0 {
                *value -= 1;
                Some(*value)
            } else {
                None
            }
        }))
    }

    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>> {
        Box::pin(self.apply(product_id, |value| *value))
    }

    fn set(&self, product_id: ProductId, value: i64) -> BoxFuture<'_, Result<(), CounterError>> {
        Box::pin(self.apply(product_id, move |current| *current = value))
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    products: HashMap<ProductId, Product>,
    orders: Vec<Order>,
    committed_intents: HashSet<Uuid>,
    next_order_id: i64,
}

/// Transactional ledger held in memory.
///
/// A commit either applies completely or not at all. Failures can be queued
/// with [`fail_next_commit`](Self::fail_next_commit); a queued failure is
/// returned before any state is touched.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    failures: Arc<Mutex<VecDeque<LedgerError>>>,
    commit_calls: Arc<AtomicUsize>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product row.
    #[must_use]
    pub fn with_product(self, product_id: ProductId, name: &str, quantity: i64) -> Self {
        self.state.lock().unwrap().products.insert(
            product_id,
            Product {
                id: product_id,
                name: name.to_string(),
                quantity,
            },
        );
        self
    }

    /// Make the next commit fail with `error`. Calls queue up.
    pub fn fail_next_commit(&self, error: LedgerError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Make the next `count` commits fail with a transient database error.
    pub fn fail_next_commits(&self, count: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(LedgerError::Database("connection reset".to_string()));
        }
    }

    /// Authoritative quantity of a product.
    #[must_use]
    pub fn quantity(&self, product_id: ProductId) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .products
            .get(&product_id)
            .map(|p| p.quantity)
    }

    /// All committed orders in commit order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().unwrap().orders.clone()
    }

    /// Number of committed orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    /// Number of `commit_order` calls, successful or not.
    #[must_use]
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    fn commit(&self, intent: &OrderIntent) -> Result<CommitOutcome, LedgerError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut state = self.state.lock().unwrap();
        if state.committed_intents.contains(&intent.intent_id) {
            return Ok(CommitOutcome::Duplicate {
                intent_id: intent.intent_id,
            });
        }

        let product = state
            .products
            .get_mut(&intent.product_id)
            .ok_or(LedgerError::ProductNotFound(intent.product_id))?;
        if product.quantity <= 0 {
            return Err(LedgerError::OutOfStock(intent.product_id));
        }
        product.quantity -= 1;
        let remaining = product.quantity;

        state.next_order_id += 1;
        let order = Order {
            id: OrderId::new(state.next_order_id),
            intent_id: intent.intent_id,
            buyer_id: intent.buyer_id,
            product_id: intent.product_id,
        };
        state.orders.push(order.clone());
        state.committed_intents.insert(intent.intent_id);

        Ok(CommitOutcome::Committed(CommittedOrder { order, remaining }))
    }
}

impl DurableLedger for InMemoryLedger {
    fn product(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<Product>, LedgerError>> {
        let product = self.state.lock().unwrap().products.get(&product_id).cloned();
        Box::pin(async move { Ok(product) })
    }

    fn commit_order<'a>(
        &'a self,
        intent: &'a OrderIntent,
    ) -> BoxFuture<'a, Result<CommitOutcome, LedgerError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.commit(intent)
        })
    }
}

/// Dead-letter sink that keeps letters in a `Vec`.
#[derive(Clone, Debug, Default)]
pub struct RecordingDeadLetters {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Letters recorded so far.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }
}

impl DeadLetterSink for RecordingDeadLetters {
    fn record(&self, letter: DeadLetter) -> BoxFuture<'_, Result<i64, DeadLetterError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeadLetterError::Database("injected failure".to_string()));
            }
            let mut letters = self.letters.lock().unwrap();
            letters.push(letter);
            Ok(i64::try_from(letters.len()).unwrap_or(i64::MAX))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flash_sale_core::BuyerId;

    const PRODUCT: ProductId = ProductId::new(1);

    #[tokio::test]
    async fn counter_conditional_decrement_stops_at_zero() {
        let counter = InMemoryStockCounter::new().with_stock(PRODUCT, 1);
        assert_eq!(counter.decrement_if_available(PRODUCT).await.unwrap(), Some(0));
        assert_eq!(counter.decrement_if_available(PRODUCT).await.unwrap(), None);
        assert_eq!(counter.value(PRODUCT), 0);
    }

    #[tokio::test]
    async fn counter_tracks_negative_excursions() {
        let counter = InMemoryStockCounter::new().with_stock(PRODUCT, 0);
        counter.decrement(PRODUCT).await.unwrap();
        counter.increment(PRODUCT).await.unwrap();
        assert_eq!(counter.value(PRODUCT), 0);
        assert_eq!(counter.min_observed(PRODUCT), -1);
    }

    #[tokio::test]
    async fn ledger_commit_is_idempotent_per_intent() {
        let ledger = InMemoryLedger::new().with_product(PRODUCT, "Widget", 5);
        let intent = OrderIntent::new(BuyerId::new(7), PRODUCT, Utc::now());

        let first = ledger.commit_order(&intent).await.unwrap();
        let second = ledger.commit_order(&intent).await.unwrap();

        assert!(matches!(first, CommitOutcome::Committed(ref c) if c.remaining == 4));
        assert_eq!(second, CommitOutcome::Duplicate { intent_id: intent.intent_id });
        assert_eq!(ledger.quantity(PRODUCT), Some(4));
        assert_eq!(ledger.order_count(), 1);
    }

    #[tokio::test]
    async fn ledger_queued_failure_leaves_state_untouched() {
        let ledger = InMemoryLedger::new().with_product(PRODUCT, "Widget", 5);
        ledger.fail_next_commits(1);
        let intent = OrderIntent::new(BuyerId::new(7), PRODUCT, Utc::now());

        assert!(ledger.commit_order(&intent).await.is_err());
        assert_eq!(ledger.quantity(PRODUCT), Some(5));
        assert!(ledger.commit_order(&intent).await.is_ok());
    }

    #[tokio::test]
    async fn dead_letters_can_fail() {
        let sink = RecordingDeadLetters::new();
        sink.set_failing(true);
        let letter = DeadLetter {
            intent: OrderIntent::new(BuyerId::new(1), PRODUCT, Utc::now()),
            error_message: "boom".to_string(),
            attempts: 1,
        };
        assert!(sink.record(letter).await.is_err());
        assert!(sink.letters().is_empty());
    }
}
