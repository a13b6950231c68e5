//! Admission gate: the fast accept/reject decision for a purchase attempt.
//!
//! The gate reserves one unit against the fast-path [`StockCounter`] and hands an
//! [`OrderIntent`] to the [`OrderChannel`]. It never takes a lock; correctness rests
//! on the counter store's atomic operations.
//!
//! Every speculative decrement that does not end in `Admitted` is compensated with
//! an increment, so a rejected call leaves the counter where it found it.

use crate::metrics::AdmissionMetrics;
use flash_sale_core::environment::{Clock, SystemClock};
use flash_sale_core::{
    BuyerId, ChannelError, CounterError, OrderChannel, OrderIntent, ProductId, StockCounter,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Default bound on a single enqueue.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the gate takes a unit from the fast-path counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionStrategy {
    /// Unconditional decrement, compensated when the result is negative.
    ///
    /// Concurrent readers may briefly observe a negative counter.
    #[default]
    TwoTier,
    /// Decrement only if the counter is positive; the counter never goes negative.
    Conditional,
}

impl fmt::Display for AdmissionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoTier => write!(f, "two_tier"),
            Self::Conditional => write!(f, "conditional"),
        }
    }
}

/// Error for an unrecognised strategy name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown admission strategy: {0} (expected two_tier or conditional)")]
pub struct ParseStrategyError(String);

impl FromStr for AdmissionStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two_tier" | "two-tier" => Ok(Self::TwoTier),
            "conditional" => Ok(Self::Conditional),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

/// Why a reservation could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The counter store failed before anything was reserved
    #[error(transparent)]
    CounterUnavailable(CounterError),

    /// The intent could not be handed off; the reservation was compensated
    #[error(transparent)]
    ChannelUnavailable(ChannelError),
}

/// Result of [`AdmissionGate::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A unit was reserved and the intent enqueued
    Admitted {
        /// Fast-path stock left after this reservation
        remaining: i64,
        /// Idempotency key of the enqueued intent
        intent_id: Uuid,
    },
    /// No stock left
    SoldOut,
    /// A dependency failed; the counter was left as it was found
    Unavailable(UnavailableReason),
}

impl ReserveOutcome {
    /// Whether the attempt was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Turns purchase attempts into admit/reject decisions.
///
/// # Example
///
/// ```rust,ignore
/// let gate = AdmissionGate::new(counter, channel)
///     .with_strategy(AdmissionStrategy::Conditional)
///     .with_enqueue_timeout(Duration::from_secs(2));
///
/// match gate.reserve(ProductId::new(1), BuyerId::new(7)).await {
///     ReserveOutcome::Admitted { remaining, .. } => println!("{remaining} left"),
///     ReserveOutcome::SoldOut => println!("sold out"),
///     ReserveOutcome::Unavailable(reason) => eprintln!("{reason}"),
/// }
/// ```
#[derive(Clone)]
pub struct AdmissionGate {
    counter: Arc<dyn StockCounter>,
    channel: Arc<dyn OrderChannel>,
    clock: Arc<dyn Clock>,
    enqueue_timeout: Duration,
    strategy: AdmissionStrategy,
}

impl AdmissionGate {
    /// Create a gate with the system clock, the default enqueue timeout and the
    /// two-tier strategy.
    #[must_use]
    pub fn new(counter: Arc<dyn StockCounter>, channel: Arc<dyn OrderChannel>) -> Self {
        Self {
            counter,
            channel,
            clock: Arc::new(SystemClock),
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            strategy: AdmissionStrategy::default(),
        }
    }

    /// Use a different clock for intent timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound each enqueue by `timeout`.
    #[must_use]
    pub const fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Select the counter strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: AdmissionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The active strategy.
    #[must_use]
    pub const fn strategy(&self) -> AdmissionStrategy {
        self.strategy
    }

    /// Reserve one unit of `product_id` for `buyer_id`.
    ///
    /// Safe under any number of concurrent callers for the same product: at most
    /// as many calls return [`ReserveOutcome::Admitted`] as the counter held.
    #[tracing::instrument(
        name = "admission.reserve",
        skip_all,
        fields(product_id = %product_id, buyer_id = %buyer_id, strategy = %self.strategy)
    )]
    pub async fn reserve(&self, product_id: ProductId, buyer_id: BuyerId) -> ReserveOutcome {
        let started = Instant::now();

        let remaining = match self.take_unit(product_id).await {
            Ok(Some(remaining)) => remaining,
            Ok(None) => {
                tracing::debug!("Sold out");
                AdmissionMetrics::record_sold_out(started.elapsed());
                return ReserveOutcome::SoldOut;
            }
            Err(error) => {
                tracing::error!(error = %error, "Stock counter unavailable");
                AdmissionMetrics::record_unavailable(started.elapsed());
                return ReserveOutcome::Unavailable(UnavailableReason::CounterUnavailable(error));
            }
        };

        let intent = OrderIntent::new(buyer_id, product_id, self.clock.now());

        match self.enqueue(&intent).await {
            Ok(()) => {
                tracing::info!(intent_id = %intent.intent_id, remaining, "Order admitted");
                AdmissionMetrics::record_admitted(started.elapsed());
                ReserveOutcome::Admitted {
                    remaining,
                    intent_id: intent.intent_id,
                }
            }
            Err(error) => {
                tracing::error!(
                    intent_id = %intent.intent_id,
                    error = %error,
                    "Failed to queue order, releasing reservation"
                );
                self.compensate(product_id).await;
                AdmissionMetrics::record_unavailable(started.elapsed());
                ReserveOutcome::Unavailable(UnavailableReason::ChannelUnavailable(error))
            }
        }
    }

    /// Take one unit from the counter. `Ok(None)` means sold out with the counter
    /// already restored.
    async fn take_unit(&self, product_id: ProductId) -> Result<Option<i64>, CounterError> {
        match self.strategy {
            AdmissionStrategy::TwoTier => {
                let remaining = self.counter.decrement(product_id).await?;
                if remaining < 0 {
                    self.compensate(product_id).await;
                    Ok(None)
                } else {
                    Ok(Some(remaining))
                }
            }
            AdmissionStrategy::Conditional => self.counter.decrement_if_available(product_id).await,
        }
    }

    async fn enqueue(&self, intent: &OrderIntent) -> Result<(), ChannelError> {
        match tokio::time::timeout(self.enqueue_timeout, self.channel.enqueue(intent)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.enqueue_timeout)),
        }
    }

    /// Give back one speculatively taken unit.
    async fn compensate(&self, product_id: ProductId) {
        if let Err(error) = self.counter.increment(product_id).await {
            // The counter now under-reports by one; the ledger stays authoritative.
            tracing::error!(
                product_id = %product_id,
                error = %error,
                "Failed to compensate stock counter"
            );
        }
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("enqueue_timeout", &self.enqueue_timeout)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
