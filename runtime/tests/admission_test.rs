//! Integration tests for the admission gate
//!
//! Covers the oversell bound under concurrency, counter compensation on every
//! rejection path, and both counter strategies.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flash_sale_core::{BuyerId, ChannelError, ProductId};
use flash_sale_runtime::{AdmissionGate, AdmissionStrategy, ReserveOutcome, UnavailableReason};
use flash_sale_testing::{InMemoryOrderChannel, InMemoryStockCounter, test_clock};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const PRODUCT: ProductId = ProductId::new(1);

// ============================================================================
// Test Fixtures
// ============================================================================

fn gate(
    stock: i64,
    strategy: AdmissionStrategy,
) -> (AdmissionGate, InMemoryStockCounter, InMemoryOrderChannel) {
    let counter = InMemoryStockCounter::new().with_stock(PRODUCT, stock);
    let channel = InMemoryOrderChannel::new();
    let gate = AdmissionGate::new(Arc::new(counter.clone()), Arc::new(channel.clone()))
        .with_clock(Arc::new(test_clock()))
        .with_strategy(strategy);
    (gate, counter, channel)
}

async fn reserve_concurrently(gate: &AdmissionGate, buyers: i64) -> Vec<ReserveOutcome> {
    let handles: Vec<_> = (0..buyers)
        .map(|buyer| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.reserve(PRODUCT, BuyerId::new(buyer)).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    outcomes
}

fn admitted(outcomes: &[ReserveOutcome]) -> usize {
    outcomes.iter().filter(|o| o.is_admitted()).count()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_of_two_buyers() {
    for strategy in [AdmissionStrategy::TwoTier, AdmissionStrategy::Conditional] {
        let (gate, counter, channel) = gate(1, strategy);

        let outcomes = reserve_concurrently(&gate, 2).await;

        assert_eq!(admitted(&outcomes), 1, "{strategy}: {outcomes:?}");
        assert!(outcomes.contains(&ReserveOutcome::SoldOut));
        assert_eq!(counter.value(PRODUCT), 0);
        assert_eq!(channel.enqueued().len(), 1);
    }
}

#[tokio::test]
async fn admitted_intent_carries_buyer_product_and_clock_time() {
    let (gate, _counter, channel) = gate(5, AdmissionStrategy::TwoTier);

    let outcome = gate.reserve(PRODUCT, BuyerId::new(7)).await;

    let ReserveOutcome::Admitted { remaining, intent_id } = outcome else {
        panic!("expected admission, got {outcome:?}");
    };
    assert_eq!(remaining, 4);

    let enqueued = channel.enqueued();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].intent_id, intent_id);
    assert_eq!(enqueued[0].buyer_id, BuyerId::new(7));
    assert_eq!(enqueued[0].product_id, PRODUCT);
    assert_eq!(enqueued[0].timestamp, 1_735_689_600);
}

#[tokio::test]
async fn failed_enqueue_restores_counter_and_reports_unavailable() {
    let (gate, counter, channel) = gate(3, AdmissionStrategy::TwoTier);
    channel.set_failing(true);

    let outcome = gate.reserve(PRODUCT, BuyerId::new(1)).await;

    assert!(matches!(
        outcome,
        ReserveOutcome::Unavailable(UnavailableReason::ChannelUnavailable(ChannelError::Unavailable(_)))
    ));
    assert_eq!(counter.value(PRODUCT), 3);
    assert!(channel.enqueued().is_empty());
}

#[tokio::test]
async fn slow_enqueue_times_out_and_is_compensated() {
    let (gate, counter, channel) = gate(3, AdmissionStrategy::Conditional);
    let gate = gate.with_enqueue_timeout(Duration::from_millis(20));
    channel.set_enqueue_delay(Some(Duration::from_millis(500)));

    let outcome = gate.reserve(PRODUCT, BuyerId::new(1)).await;

    assert_eq!(
        outcome,
        ReserveOutcome::Unavailable(UnavailableReason::ChannelUnavailable(ChannelError::Timeout(
            Duration::from_millis(20)
        )))
    );
    assert_eq!(counter.value(PRODUCT), 3);
}

#[tokio::test]
async fn counter_outage_is_unavailable_without_compensation() {
    let (gate, counter, channel) = gate(3, AdmissionStrategy::TwoTier);
    counter.set_unavailable(true);

    let outcome = gate.reserve(PRODUCT, BuyerId::new(1)).await;
    assert!(matches!(
        outcome,
        ReserveOutcome::Unavailable(UnavailableReason::CounterUnavailable(_))
    ));

    counter.set_unavailable(false);
    assert_eq!(counter.value(PRODUCT), 3);
    assert!(channel.enqueued().is_empty());
}

#[tokio::test]
async fn sold_out_leaves_counter_where_it_was() {
    let (gate, counter, _channel) = gate(0, AdmissionStrategy::TwoTier);

    assert_eq!(gate.reserve(PRODUCT, BuyerId::new(1)).await, ReserveOutcome::SoldOut);
    assert_eq!(counter.value(PRODUCT), 0);
    // The two-tier strategy passes through -1 before compensating
    assert_eq!(counter.min_observed(PRODUCT), -1);
}

#[tokio::test]
async fn conditional_strategy_never_goes_negative() {
    let (gate, counter, _channel) = gate(2, AdmissionStrategy::Conditional);

    let outcomes = reserve_concurrently(&gate, 10).await;

    assert_eq!(admitted(&outcomes), 2);
    assert_eq!(counter.value(PRODUCT), 0);
    assert_eq!(counter.min_observed(PRODUCT), 0);
}

#[tokio::test]
async fn unknown_product_is_sold_out() {
    let (gate, counter, _channel) = gate(5, AdmissionStrategy::TwoTier);

    let other = ProductId::new(99);
    assert_eq!(gate.reserve(other, BuyerId::new(1)).await, ReserveOutcome::SoldOut);
    assert_eq!(counter.value(other), 0);
}

// ============================================================================
// Properties
// ============================================================================

fn any_strategy() -> impl Strategy<Value = AdmissionStrategy> {
    prop_oneof![Just(AdmissionStrategy::TwoTier), Just(AdmissionStrategy::Conditional)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// At most `stock` of any number of concurrent calls are admitted, and the
    /// counter ends at `stock - admitted`.
    #[test]
    fn never_admits_more_than_seeded(stock in 0i64..20, buyers in 0i64..60, strategy in any_strategy()) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (gate, counter, channel) = gate(stock, strategy);
            let outcomes = reserve_concurrently(&gate, buyers).await;

            let admitted = i64::try_from(admitted(&outcomes)).unwrap();
            prop_assert_eq!(admitted, stock.min(buyers));
            prop_assert_eq!(counter.value(PRODUCT), stock - admitted);
            prop_assert_eq!(i64::try_from(channel.enqueued().len()).unwrap(), admitted);
            Ok(())
        })?;
    }

    /// Every rejected call leaves the counter exactly as it found it.
    #[test]
    fn rejections_are_compensated(
        stock in 0i64..10,
        channel_fails in any::<bool>(),
        strategy in any_strategy(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (gate, counter, channel) = gate(stock, strategy);
            channel.set_failing(channel_fails);

            let before = counter.value(PRODUCT);
            let outcome = gate.reserve(PRODUCT, BuyerId::new(1)).await;

            match outcome {
                ReserveOutcome::Admitted { remaining, .. } => {
                    prop_assert_eq!(remaining, before - 1);
                    prop_assert_eq!(counter.value(PRODUCT), before - 1);
                }
                ReserveOutcome::SoldOut | ReserveOutcome::Unavailable(_) => {
                    prop_assert_eq!(counter.value(PRODUCT), before);
                }
            }
            Ok(())
        })?;
    }
}
