//! Best-effort publish/subscribe channel for stock updates.
//!
//! One logical topic, [`STOCK_UPDATES_CHANNEL`]. Publishing is fire-and-forget:
//! events published while nobody is subscribed are lost, and consumers must
//! tolerate duplicates and gaps.

use crate::model::StockUpdateEvent;
use futures::Stream;
use futures::future::BoxFuture;
use std::pin::Pin;
use thiserror::Error;

/// Default name of the stock update topic.
pub const STOCK_UPDATES_CHANNEL: &str = "stock_updates";

/// Errors from the broadcast channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// The broker could not be reached
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected a publish
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The event could not be encoded
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Stream of stock updates from a live subscription.
///
/// The stream ends when the subscription is lost. Malformed payloads are
/// skipped by the implementation.
pub type StockUpdateStream = Pin<Box<dyn Stream<Item = StockUpdateEvent> + Send>>;

/// Publish/subscribe transport for [`StockUpdateEvent`]s.
pub trait BroadcastChannel: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError`] if the broker refused or could not be reached.
    fn publish<'a>(
        &'a self,
        event: &'a StockUpdateEvent,
    ) -> BoxFuture<'a, Result<(), BroadcastError>>;

    /// Open a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Unavailable`] if the subscription cannot be established.
    fn subscribe(&self) -> BoxFuture<'_, Result<StockUpdateStream, BroadcastError>>;
}
