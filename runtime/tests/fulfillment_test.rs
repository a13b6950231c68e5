//! Integration tests for the fulfillment worker
//!
//! Exercises the commit path, ledger rejections, idempotent redelivery and the
//! acknowledgment/dead-letter policy under both ack modes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flash_sale_core::environment::Clock;
use flash_sale_core::{
    BuyerId, DeadLetterSink, Delivery, LedgerError, OrderIntent, ProductId, Settlement,
    StockUpdateEvent,
};
use flash_sale_runtime::{AckMode, Disposition, FulfillmentWorker, ProcessOutcome, RetryPolicy};
use flash_sale_testing::{
    InMemoryBroadcastChannel, InMemoryLedger, InMemoryOrderChannel, RecordingDeadLetters,
    test_clock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const PRODUCT: ProductId = ProductId::new(1);

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    ledger: InMemoryLedger,
    updates: InMemoryBroadcastChannel,
    dead_letters: RecordingDeadLetters,
    worker: FulfillmentWorker,
}

fn harness(quantity: i64, mode: AckMode) -> Harness {
    let ledger = InMemoryLedger::new().with_product(PRODUCT, "Limited Sneaker", quantity);
    let updates = InMemoryBroadcastChannel::new();
    let dead_letters = RecordingDeadLetters::new();
    let worker = FulfillmentWorker::new(Arc::new(ledger.clone()), Arc::new(updates.clone()))
        .with_dead_letters(Arc::new(dead_letters.clone()) as Arc<dyn DeadLetterSink>)
        .with_ack_mode(mode)
        .with_max_deliveries(3);
    Harness {
        ledger,
        updates,
        dead_letters,
        worker,
    }
}

fn intent(buyer: i64) -> OrderIntent {
    OrderIntent::new(BuyerId::new(buyer), PRODUCT, test_clock().now())
}

async fn deliver(worker: &FulfillmentWorker, intent: OrderIntent, attempt: u32) -> (Disposition, Settlement) {
    let (delivery, settled) = Delivery::new(intent, attempt);
    let disposition = worker.handle(delivery).await;
    (disposition, settled.await.unwrap())
}

// ============================================================================
// Commit path
// ============================================================================

#[tokio::test]
async fn commit_decrements_inserts_order_and_announces_stock() {
    let h = harness(5, AckMode::AfterCommit);

    let outcome = h.worker.process(&intent(7)).await.unwrap();

    let ProcessOutcome::Committed { order, event, published } = outcome else {
        panic!("expected a commit");
    };
    assert!(published);
    assert_eq!(order.buyer_id, BuyerId::new(7));
    assert_eq!(order.product_id, PRODUCT);
    assert_eq!(event, StockUpdateEvent::new(PRODUCT, 4));
    assert_eq!(event.to_json().unwrap(), r#"{"product_id":1,"stock":4}"#);

    assert_eq!(h.ledger.quantity(PRODUCT), Some(4));
    assert_eq!(h.ledger.orders(), vec![order]);
    assert_eq!(h.updates.published(), vec![StockUpdateEvent::new(PRODUCT, 4)]);
}

#[tokio::test]
async fn empty_stock_rolls_back_without_order_or_event() {
    let h = harness(0, AckMode::AfterCommit);

    let error = h.worker.process(&intent(7)).await.unwrap_err();

    assert!(!error.is_transient());
    assert_eq!(h.ledger.quantity(PRODUCT), Some(0));
    assert_eq!(h.ledger.order_count(), 0);
    assert!(h.updates.published().is_empty());
}

#[tokio::test]
async fn publish_failure_keeps_the_commit() {
    let h = harness(2, AckMode::AfterCommit);
    h.updates.set_publish_failing(true);

    let (disposition, settlement) = deliver(&h.worker, intent(1), 1).await;

    assert_eq!(disposition, Disposition::Committed);
    assert_eq!(settlement, Settlement::Ack);
    assert_eq!(h.ledger.quantity(PRODUCT), Some(1));
    assert!(h.updates.published().is_empty());
}

#[tokio::test]
async fn redelivered_intent_is_committed_once() {
    let h = harness(5, AckMode::AfterCommit);
    let intent = intent(7);

    let (first, _) = deliver(&h.worker, intent.clone(), 1).await;
    let (second, settlement) = deliver(&h.worker, intent, 2).await;

    assert_eq!(first, Disposition::Committed);
    assert_eq!(second, Disposition::Duplicate);
    assert_eq!(settlement, Settlement::Ack);
    assert_eq!(h.ledger.quantity(PRODUCT), Some(4));
    assert_eq!(h.ledger.order_count(), 1);
    assert_eq!(h.updates.published().len(), 1);
}

#[tokio::test]
async fn quantity_never_goes_below_zero() {
    let h = harness(3, AckMode::AfterCommit);

    for buyer in 0..10 {
        let _ = h.worker.process(&intent(buyer)).await;
    }

    assert_eq!(h.ledger.quantity(PRODUCT), Some(0));
    assert_eq!(h.ledger.order_count(), 3);
    let stocks: Vec<i64> = h.updates.published().iter().map(|e| e.stock).collect();
    assert_eq!(stocks, vec![2, 1, 0]);
}

// ============================================================================
// Acknowledgment policy
// ============================================================================

#[tokio::test]
async fn transient_failure_is_nacked_below_the_limit() {
    let h = harness(5, AckMode::AfterCommit);
    h.ledger.fail_next_commits(1);

    let (disposition, settlement) = deliver(&h.worker, intent(1), 1).await;

    assert_eq!(disposition, Disposition::Retried);
    assert_eq!(settlement, Settlement::Nack);
    assert!(h.dead_letters.letters().is_empty());
}

#[tokio::test]
async fn transient_failure_at_the_limit_is_dead_lettered() {
    let h = harness(5, AckMode::AfterCommit);
    h.ledger.fail_next_commits(1);
    let intent = intent(1);

    let (disposition, settlement) = deliver(&h.worker, intent.clone(), 3).await;

    assert_eq!(disposition, Disposition::DeadLettered);
    assert_eq!(settlement, Settlement::Ack);
    let letters = h.dead_letters.letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].intent, intent);
    assert_eq!(letters[0].attempts, 3);
    assert!(letters[0].error_message.contains("connection reset"));
}

#[tokio::test]
async fn permanent_failure_is_dead_lettered_immediately() {
    let h = harness(5, AckMode::AfterCommit);
    h.ledger.fail_next_commit(LedgerError::ProductNotFound(PRODUCT));

    let (disposition, settlement) = deliver(&h.worker, intent(1), 1).await;

    assert_eq!(disposition, Disposition::DeadLettered);
    assert_eq!(settlement, Settlement::Ack);
    assert_eq!(h.dead_letters.letters()[0].attempts, 1);
}

#[tokio::test]
async fn dead_letter_write_failure_requests_redelivery() {
    let h = harness(0, AckMode::AfterCommit);
    h.dead_letters.set_failing(true);

    let (disposition, settlement) = deliver(&h.worker, intent(1), 1).await;

    assert_eq!(disposition, Disposition::Retried);
    assert_eq!(settlement, Settlement::Nack);
}

#[tokio::test]
async fn without_dead_letter_store_permanent_failures_are_dropped() {
    let ledger = InMemoryLedger::new().with_product(PRODUCT, "Limited Sneaker", 0);
    let worker = FulfillmentWorker::new(
        Arc::new(ledger.clone()),
        Arc::new(InMemoryBroadcastChannel::new()),
    );

    let (disposition, settlement) = deliver(&worker, intent(1), 1).await;

    assert_eq!(disposition, Disposition::Dropped);
    assert_eq!(settlement, Settlement::Ack);
}

#[tokio::test]
async fn on_receipt_acks_first_and_drops_failures() {
    let h = harness(5, AckMode::OnReceipt);
    h.ledger.fail_next_commits(1);

    let (disposition, settlement) = deliver(&h.worker, intent(1), 1).await;

    assert_eq!(disposition, Disposition::Dropped);
    assert_eq!(settlement, Settlement::Ack);
    assert_eq!(h.ledger.order_count(), 0);
    assert!(h.dead_letters.letters().is_empty());
}

// ============================================================================
// Consumer loop
// ============================================================================

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn run_retries_transient_failures_until_committed() {
    let h = harness(5, AckMode::AfterCommit);
    let channel = InMemoryOrderChannel::new();
    h.ledger.fail_next_commits(2);
    channel.push_delivery(intent(1), 1);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ledger = h.ledger.clone();
    let worker = Arc::new(h.worker);
    let task = Arc::clone(&worker).spawn(Arc::new(channel.clone()), shutdown_rx);

    wait_until(|| ledger.order_count() == 1 && channel.is_drained()).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(channel.nacked().len(), 2);
    assert_eq!(channel.acked().len(), 1);
    assert_eq!(ledger.commit_calls(), 3);
}

#[tokio::test]
async fn run_reconnects_after_consume_failure() {
    let h = harness(5, AckMode::AfterCommit);
    let channel = InMemoryOrderChannel::new();
    channel.fail_next_consumes(2);
    channel.push_delivery(intent(1), 1);

    let worker = h.worker.with_reconnect_policy(
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ledger = h.ledger.clone();
    let task = Arc::new(worker).spawn(Arc::new(channel.clone()), shutdown_rx);

    wait_until(|| ledger.order_count() == 1).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn competing_workers_share_the_queue_without_overselling() {
    let ledger = InMemoryLedger::new().with_product(PRODUCT, "Limited Sneaker", 5);
    let updates = InMemoryBroadcastChannel::new();
    let channel = InMemoryOrderChannel::new();
    for buyer in 0..8 {
        channel.push_delivery(intent(buyer), 1);
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let tasks: Vec<_> = (0..3)
        .map(|n| {
            let worker = FulfillmentWorker::new(Arc::new(ledger.clone()), Arc::new(updates.clone()))
                .with_name(format!("fulfillment-{n}"));
            Arc::new(worker).spawn(Arc::new(channel.clone()), shutdown_tx.subscribe())
        })
        .collect();

    wait_until(|| channel.is_drained() && channel.acked().len() == 8).await;
    shutdown_tx.send(()).unwrap();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(ledger.quantity(PRODUCT), Some(0));
    assert_eq!(ledger.order_count(), 5);
    assert_eq!(updates.published().len(), 5);
}
