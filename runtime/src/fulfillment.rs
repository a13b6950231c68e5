//! Fulfillment worker: turns admitted intents into committed orders.
//!
//! For each delivery the worker commits one order against the [`DurableLedger`]
//! (insert order, conditional decrement, read back) and, on commit, publishes the
//! authoritative stock level on the [`BroadcastChannel`].
//!
//! # Acknowledgment
//!
//! | [`AckMode`] | Success | Transient failure | Permanent failure |
//! |-------------|---------|-------------------|-------------------|
//! | `AfterCommit` | ack | nack (redeliver) until `max_deliveries`, then dead-letter + ack | dead-letter + ack |
//! | `OnReceipt` | ack before processing | logged and dropped | logged and dropped |
//!
//! A dead-letter write that fails leaves the delivery nacked so the intent is not lost.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     consume (backoff on failure)
//!     for each delivery: handle, settle
//!     stream ended: reconnect
//! } until shutdown
//! ```

use crate::metrics::FulfillmentMetrics;
use crate::retry::RetryPolicy;
use flash_sale_core::{
    BroadcastChannel, CommitOutcome, DeadLetter, DeadLetterSink, Delivery, DeliveryStream,
    DurableLedger, IntentSource, LedgerError, Order, OrderIntent, StockUpdateEvent,
};
use futures::StreamExt;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Deliveries attempted before a transiently failing intent is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// When a delivery is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledge only once the outcome is final (committed, duplicate or dead-lettered)
    #[default]
    AfterCommit,
    /// Acknowledge on receipt; failures lose the intent
    OnReceipt,
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterCommit => write!(f, "after_commit"),
            Self::OnReceipt => write!(f, "on_receipt"),
        }
    }
}

/// Error for an unrecognised ack mode name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown ack mode: {0} (expected after_commit or on_receipt)")]
pub struct ParseAckModeError(String);

impl FromStr for AckMode {
    type Err = ParseAckModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_commit" | "after-commit" => Ok(Self::AfterCommit),
            "on_receipt" | "on-receipt" => Ok(Self::OnReceipt),
            other => Err(ParseAckModeError(other.to_string())),
        }
    }
}

/// Errors from processing one intent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentError {
    /// The ledger transaction failed and was rolled back
    #[error("Ledger commit failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl FulfillmentError {
    /// Whether a later redelivery could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Ledger(error) => error.is_transient(),
        }
    }
}

/// What [`FulfillmentWorker::process`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// An order was committed
    Committed {
        /// The new order
        order: Order,
        /// The update announced to viewers
        event: StockUpdateEvent,
        /// Whether the broadcast publish succeeded
        published: bool,
    },
    /// The intent had already been committed by an earlier delivery
    Duplicate {
        /// The repeated intent
        intent_id: Uuid,
    },
}

/// Final disposition of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Committed and acknowledged
    Committed,
    /// Already committed earlier; acknowledged
    Duplicate,
    /// Negatively acknowledged for redelivery
    Retried,
    /// Written to the dead-letter store and acknowledged
    DeadLettered,
    /// Acknowledged without a committed order
    Dropped,
}

/// Consumes intents and commits them to the ledger.
pub struct FulfillmentWorker {
    name: String,
    ledger: Arc<dyn DurableLedger>,
    broadcast: Arc<dyn BroadcastChannel>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    ack_mode: AckMode,
    max_deliveries: u32,
    reconnect: RetryPolicy,
}

impl FulfillmentWorker {
    /// Create a worker acknowledging after commit, without a dead-letter store.
    #[must_use]
    pub fn new(ledger: Arc<dyn DurableLedger>, broadcast: Arc<dyn BroadcastChannel>) -> Self {
        Self {
            name: "fulfillment".to_string(),
            ledger,
            broadcast,
            dead_letters: None,
            ack_mode: AckMode::default(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            reconnect: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(5))
                .build(),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Store intents that cannot be fulfilled.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Choose when deliveries are acknowledged.
    #[must_use]
    pub const fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    /// Deliveries allowed before a transient failure is dead-lettered (at least 1).
    #[must_use]
    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = max.max(1);
        self
    }

    /// Backoff between reconnection attempts in [`run`](Self::run).
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commit one intent and announce the new stock level.
    ///
    /// A failed publish is logged and dropped: the order stays committed.
    ///
    /// # Errors
    ///
    /// Returns [`FulfillmentError`] if the ledger transaction was rolled back.
    #[tracing::instrument(
        name = "fulfillment.process",
        skip_all,
        fields(
            worker = %self.name,
            intent_id = %intent.intent_id,
            product_id = %intent.product_id,
            buyer_id = %intent.buyer_id
        )
    )]
    pub async fn process(&self, intent: &OrderIntent) -> Result<ProcessOutcome, FulfillmentError> {
        match self.ledger.commit_order(intent).await? {
            CommitOutcome::Committed(committed) => {
                FulfillmentMetrics::record_committed();
                info!(
                    order_id = %committed.order.id,
                    remaining = committed.remaining,
                    "Order committed"
                );

                let event = StockUpdateEvent::new(intent.product_id, committed.remaining);
                let published = match self.broadcast.publish(&event).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Failed to publish stock update");
                        false
                    }
                };

                Ok(ProcessOutcome::Committed {
                    order: committed.order,
                    event,
                    published,
                })
            }
            CommitOutcome::Duplicate { intent_id } => {
                FulfillmentMetrics::record_duplicate();
                info!("Intent already fulfilled, skipping");
                Ok(ProcessOutcome::Duplicate { intent_id })
            }
        }
    }

    /// Process one delivery and settle it according to the ack mode.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        match self.ack_mode {
            AckMode::OnReceipt => self.handle_on_receipt(delivery).await,
            AckMode::AfterCommit => self.handle_after_commit(delivery).await,
        }
    }

    async fn handle_on_receipt(&self, delivery: Delivery) -> Disposition {
        let intent = delivery.intent().clone();
        delivery.ack();

        match self.process(&intent).await {
            Ok(outcome) => Self::disposition_of(&outcome),
            Err(e) => {
                FulfillmentMetrics::record_rejected();
                error!(
                    worker = %self.name,
                    intent_id = %intent.intent_id,
                    error = %e,
                    "Fulfillment failed, intent dropped"
                );
                Disposition::Dropped
            }
        }
    }

    async fn handle_after_commit(&self, delivery: Delivery) -> Disposition {
        let result = self.process(delivery.intent()).await;

        match result {
            Ok(outcome) => {
                delivery.ack();
                Self::disposition_of(&outcome)
            }
            Err(e) if e.is_transient() && delivery.attempt() < self.max_deliveries => {
                FulfillmentMetrics::record_retried();
                warn!(
                    worker = %self.name,
                    intent_id = %delivery.intent().intent_id,
                    attempt = delivery.attempt(),
                    max_deliveries = self.max_deliveries,
                    error = %e,
                    "Fulfillment failed, requesting redelivery"
                );
                delivery.nack();
                Disposition::Retried
            }
            Err(e) => {
                if !e.is_transient() {
                    FulfillmentMetrics::record_rejected();
                }
                self.dead_letter(delivery, &e).await
            }
        }
    }

    async fn dead_letter(&self, delivery: Delivery, failure: &FulfillmentError) -> Disposition {
        let Some(sink) = &self.dead_letters else {
            error!(
                worker = %self.name,
                intent_id = %delivery.intent().intent_id,
                error = %failure,
                "Fulfillment failed and no dead letter store is configured, intent dropped"
            );
            delivery.ack();
            return Disposition::Dropped;
        };

        let letter = DeadLetter {
            intent: delivery.intent().clone(),
            error_message: failure.to_string(),
            attempts: delivery.attempt(),
        };

        match sink.record(letter).await {
            Ok(id) => {
                FulfillmentMetrics::record_dead_lettered();
                warn!(
                    worker = %self.name,
                    intent_id = %delivery.intent().intent_id,
                    dead_letter_id = id,
                    attempts = delivery.attempt(),
                    error = %failure,
                    "Intent moved to dead letter store"
                );
                delivery.ack();
                Disposition::DeadLettered
            }
            Err(e) => {
                FulfillmentMetrics::record_retried();
                error!(
                    worker = %self.name,
                    intent_id = %delivery.intent().intent_id,
                    error = %e,
                    "Failed to write dead letter, requesting redelivery"
                );
                delivery.nack();
                Disposition::Retried
            }
        }
    }

    const fn disposition_of(outcome: &ProcessOutcome) -> Disposition {
        match outcome {
            ProcessOutcome::Committed { .. } => Disposition::Committed,
            ProcessOutcome::Duplicate { .. } => Disposition::Duplicate,
        }
    }

    /// Consume from `source` until `shutdown` fires.
    ///
    /// Reconnects with backoff when the subscription fails or the stream ends.
    pub async fn run(&self, source: &dyn IntentSource, mut shutdown: broadcast::Receiver<()>) {
        info!(worker = %self.name, ack_mode = %self.ack_mode, "Fulfillment worker started");
        let mut failures = 0usize;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                consumed = source.consume() => {
                    match consumed {
                        Ok(stream) => {
                            failures = 0;
                            info!(worker = %self.name, "Consuming order intents");
                            if self.process_stream(stream, &mut shutdown).await {
                                break;
                            }
                            warn!(worker = %self.name, "Intent stream ended, reconnecting");
                        }
                        Err(e) => {
                            error!(worker = %self.name, error = %e, "Failed to consume order intents");
                        }
                    }
                }
            }

            let delay = self.reconnect.jittered_delay(failures, &mut rand::thread_rng());
            failures = failures.saturating_add(1);
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(worker = %self.name, "Fulfillment worker stopped");
    }

    /// Returns `true` when shutdown was requested.
    async fn process_stream(
        &self,
        mut stream: DeliveryStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let disposition = self.handle(delivery).await;
                        debug!(worker = %self.name, ?disposition, "Delivery settled");
                    }
                    Some(Err(e)) => {
                        error!(worker = %self.name, error = %e, "Error receiving delivery");
                    }
                    None => return false,
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) as a background task.
    #[must_use]
    pub fn spawn(
        self: Arc<Self>,
        source: Arc<dyn IntentSource>,
        shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(source.as_ref(), shutdown).await })
    }
}

impl fmt::Debug for FulfillmentWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FulfillmentWorker")
            .field("name", &self.name)
            .field("ack_mode", &self.ack_mode)
            .field("max_deliveries", &self.max_deliveries)
            .field("dead_letters", &self.dead_letters.is_some())
            .finish_non_exhaustive()
    }
}
