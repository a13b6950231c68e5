//! Durable order channel between admission and fulfillment.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with explicit settlement:
//! - The producer side ([`OrderChannel`]) enqueues with persisted delivery.
//! - The consumer side ([`IntentSource`]) yields [`Delivery`] values. Each one must be
//!   settled with [`Delivery::ack`] or [`Delivery::nack`].
//! - A nacked delivery comes back later with its attempt count incremented.
//! - A delivery dropped without settlement is never acknowledged, so the broker
//!   redelivers it after the consumer restarts.
//! - No ordering is guaranteed across buyers.

use crate::model::OrderIntent;
use futures::Stream;
use futures::future::BoxFuture;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from the order channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The enqueue did not complete within its bound
    #[error("Enqueue timed out after {0:?}")]
    Timeout(Duration),

    /// The broker rejected the operation or could not be reached
    #[error("Order channel unavailable: {0}")]
    Unavailable(String),

    /// The intent could not be encoded or a payload could not be decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Failure while consuming
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Producer side of the order channel.
pub trait OrderChannel: Send + Sync {
    /// Durably enqueue one intent.
    ///
    /// Implementations bound the call with their own send timeout; callers may
    /// bound it further.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the broker did not acknowledge the write.
    fn enqueue<'a>(&'a self, intent: &'a OrderIntent) -> BoxFuture<'a, Result<(), ChannelError>>;
}

/// How a consumer settled a [`Delivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processing is finished; never deliver again
    Ack,
    /// Processing failed transiently; deliver again later
    Nack,
}

/// One delivery of an intent to a consumer.
#[derive(Debug)]
pub struct Delivery {
    intent: OrderIntent,
    attempt: u32,
    settled_tx: oneshot::Sender<Settlement>,
}

impl Delivery {
    /// Create a delivery and the receiver on which its settlement arrives.
    ///
    /// `attempt` starts at 1 for the first delivery.
    #[must_use]
    pub fn new(intent: OrderIntent, attempt: u32) -> (Self, oneshot::Receiver<Settlement>) {
        let (settled_tx, settled_rx) = oneshot::channel();
        (
            Self {
                intent,
                attempt,
                settled_tx,
            },
            settled_rx,
        )
    }

    /// The delivered intent.
    #[must_use]
    pub const fn intent(&self) -> &OrderIntent {
        &self.intent
    }

    /// How many times this intent has been delivered, including this one.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledge: processing is complete.
    pub fn ack(self) {
        self.settle(Settlement::Ack);
    }

    /// Negatively acknowledge: redeliver later.
    pub fn nack(self) {
        self.settle(Settlement::Nack);
    }

    fn settle(self, settlement: Settlement) {
        if self.settled_tx.send(settlement).is_err() {
            tracing::debug!(
                intent_id = %self.intent.intent_id,
                ?settlement,
                "Delivery settled after its source went away"
            );
        }
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, ChannelError>> + Send>>;

/// Consumer side of the order channel.
pub trait IntentSource: Send + Sync {
    /// Start consuming. Several sources in the same consumer group share the work.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the subscription cannot be established.
    fn consume(&self) -> BoxFuture<'_, Result<DeliveryStream, ChannelError>>;
}
