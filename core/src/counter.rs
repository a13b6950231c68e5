//! Fast-path stock counter.
//!
//! A volatile, externally hosted map of `product:<id>:stock` → signed integer.
//! It is only an admission optimization: the durable ledger stays the authority.
//! Every mutation must be atomic in the backing store; callers never lock.
//!
//! A missing entry reads as `0`.

use crate::model::ProductId;
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors from the fast-path counter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// The store could not be reached or rejected the command
    #[error("Stock counter unavailable: {0}")]
    Unavailable(String),

    /// The stored value is not an integer
    #[error("Stock counter for product {product_id} holds a non-integer value: {reason}")]
    InvalidValue {
        /// Product whose entry is corrupt
        product_id: ProductId,
        /// Decoder message
        reason: String,
    },
}

/// Atomic integer store keyed by product.
///
/// # Strategies
///
/// The admission gate uses either:
///
/// - [`decrement`](Self::decrement) + [`increment`](Self::increment): the two-tier
///   model. The counter may be observed below zero between a losing decrement and
///   its compensation.
/// - [`decrement_if_available`](Self::decrement_if_available): a single conditional
///   operation that never lets the counter go negative.
pub trait StockCounter: Send + Sync {
    /// Atomically subtract one and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if the store fails; no decrement happened in that case.
    fn decrement(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Atomically add one and return the new value.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if the store fails.
    fn increment(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Atomically subtract one only if the current value is positive.
    ///
    /// Returns `Some(new_value)` when a unit was taken, `None` when the counter was
    /// already at or below zero (it is left untouched).
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if the store fails.
    fn decrement_if_available(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<i64>, CounterError>>;

    /// Read the current value (`0` when absent).
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if the store fails.
    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>>;

    /// Overwrite the value. Used only for startup seeding.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if the store fails.
    fn set(&self, product_id: ProductId, value: i64) -> BoxFuture<'_, Result<(), CounterError>>;
}
