//! Dead-letter sink for intents that fulfillment gave up on.

use crate::model::OrderIntent;
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors from the dead-letter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterError {
    /// Store failure
    #[error("Dead letter store error: {0}")]
    Database(String),

    /// A stored status string is not recognised
    #[error("Invalid dead letter status: {0}")]
    InvalidStatus(String),
}

/// An intent that could not be fulfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The intent as it was delivered
    pub intent: OrderIntent,
    /// Human-readable failure
    pub error_message: String,
    /// Deliveries attempted before giving up
    pub attempts: u32,
}

/// Durable destination for dead letters.
pub trait DeadLetterSink: Send + Sync {
    /// Persist one dead letter and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError`] if the write fails.
    fn record(&self, letter: DeadLetter) -> BoxFuture<'_, Result<i64, DeadLetterError>>;
}
