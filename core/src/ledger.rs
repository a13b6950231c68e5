//! Authoritative relational ledger.
//!
//! The ledger owns `products(id, name, quantity)` and `orders(id, intent_id,
//! buyer_id, product_id)`. Only fulfillment writes to it, and only through
//! [`DurableLedger::commit_order`].

use crate::model::{Order, OrderIntent, Product, ProductId};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the durable ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The conditional decrement found no stock left; the transaction was rolled back
    #[error("Product {0} is out of stock")]
    OutOfStock(ProductId),

    /// The product row does not exist; the transaction was rolled back
    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    /// Connectivity or other store failure; the transaction was rolled back
    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Whether retrying the same intent later could succeed.
    ///
    /// `OutOfStock` and `ProductNotFound` are permanent for a given intent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOrder {
    /// The inserted order row
    pub order: Order,
    /// Authoritative quantity left after this commit
    pub remaining: i64,
}

/// What [`DurableLedger::commit_order`] did with an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new order was inserted and the quantity decremented by one
    Committed(CommittedOrder),
    /// An order for this intent already exists; nothing changed
    Duplicate {
        /// The intent that was seen before
        intent_id: Uuid,
    },
}

/// Transactional store of products and orders.
pub trait DurableLedger: Send + Sync {
    /// Load a product row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    fn product(&self, product_id: ProductId)
    -> BoxFuture<'_, Result<Option<Product>, LedgerError>>;

    /// Commit one order for `intent` in a single transaction:
    ///
    /// 1. insert the order row (skipped as [`CommitOutcome::Duplicate`] when the
    ///    intent was already committed),
    /// 2. decrement the product quantity by one only if it is greater than zero,
    /// 3. read back the remaining quantity.
    ///
    /// If any step fails the whole transaction is rolled back.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::OutOfStock`] when the guard in step 2 fails
    /// - [`LedgerError::ProductNotFound`] when the product does not exist
    /// - [`LedgerError::Database`] for store failures
    fn commit_order<'a>(
        &'a self,
        intent: &'a OrderIntent,
    ) -> BoxFuture<'a, Result<CommitOutcome, LedgerError>>;
}
