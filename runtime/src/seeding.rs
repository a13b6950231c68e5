//! Startup seeding of the fast-path counter from the ledger.

use flash_sale_core::{CounterError, DurableLedger, LedgerError, ProductId, StockCounter};
use thiserror::Error;

/// Errors from [`seed_stock`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    /// Reading the product failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Writing the counter failed
    #[error(transparent)]
    Counter(#[from] CounterError),
}

/// Copy `products.quantity` into the counter entry for `product_id`.
///
/// Returns the seeded quantity, or `None` when the product does not exist (the
/// counter is left untouched).
///
/// # Errors
///
/// Returns [`SeedError`] if either store fails.
#[tracing::instrument(name = "seed_stock", skip_all, fields(product_id = %product_id))]
pub async fn seed_stock(
    ledger: &dyn DurableLedger,
    counter: &dyn StockCounter,
    product_id: ProductId,
) -> Result<Option<i64>, SeedError> {
    let Some(product) = ledger.product(product_id).await? else {
        tracing::warn!("Product not found, stock counter not seeded");
        return Ok(None);
    };

    counter.set(product_id, product.quantity).await?;
    tracing::info!(
        product = %product.name,
        quantity = product.quantity,
        key = %product_id.stock_key(),
        "Stock counter seeded"
    );
    Ok(Some(product.quantity))
}
