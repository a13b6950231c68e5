//! Transactional product/order ledger on `PostgreSQL`.

use flash_sale_core::{
    CommitOutcome, CommittedOrder, DurableLedger, LedgerError, Order, OrderId, OrderIntent,
    Product, ProductId,
};
use futures::future::BoxFuture;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// `PostgreSQL` error code for a foreign key violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn database_error(error: &sqlx::Error) -> LedgerError {
    LedgerError::Database(error.to_string())
}

/// Ledger of `products` and `orders`.
///
/// [`commit_order`](DurableLedger::commit_order) runs in one transaction:
///
/// ```sql
/// INSERT INTO orders (intent_id, buyer_id, product_id) VALUES ($1, $2, $3)
///     ON CONFLICT (intent_id) DO NOTHING RETURNING id;
/// UPDATE products SET quantity = quantity - 1
///     WHERE id = $1 AND quantity > 0 RETURNING quantity;
/// ```
///
/// The guarded `UPDATE` is the only place stock is decremented, so concurrent
/// workers cannot push a quantity below zero. Its `RETURNING` clause is the
/// read-back of the authoritative remaining quantity.
///
/// # Example
///
/// ```no_run
/// use flash_sale_postgres::PostgresLedger;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PostgresLedger::connect("postgres://localhost/flashsale_db", 10).await?;
/// ledger.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| database_error(&e))?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Insert a product row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the insert fails (including a negative quantity).
    pub async fn create_product(&self, name: &str, quantity: i64) -> Result<Product, LedgerError> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO products (name, quantity) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(quantity)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| database_error(&e))?;

        tracing::info!(product_id = id, name, quantity, "Product created");

        Ok(Product {
            id: ProductId::new(id),
            name: name.to_string(),
            quantity,
        })
    }

    /// Orders committed for a product, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn orders_for(&self, product_id: ProductId) -> Result<Vec<Order>, LedgerError> {
        let rows: Vec<(i64, uuid::Uuid, i64, i64)> = sqlx::query_as(
            r"
            SELECT id, intent_id, buyer_id, product_id
            FROM orders
            WHERE product_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(product_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error(&e))?;

        Ok(rows
            .into_iter()
            .map(|(id, intent_id, buyer_id, product_id)| Order {
                id: OrderId::new(id),
                intent_id,
                buyer_id: buyer_id.into(),
                product_id: product_id.into(),
            })
            .collect())
    }

    async fn find_product(&self, product_id: ProductId) -> Result<Option<Product>, LedgerError> {
        let row: Option<(i64, String, i64)> =
            sqlx::query_as("SELECT id, name, quantity FROM products WHERE id = $1")
                .bind(product_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| database_error(&e))?;

        Ok(row.map(|(id, name, quantity)| Product {
            id: ProductId::new(id),
            name,
            quantity,
        }))
    }

    #[tracing::instrument(
        name = "ledger.commit_order",
        skip_all,
        fields(intent_id = %intent.intent_id, product_id = %intent.product_id)
    )]
    async fn commit(&self, intent: &OrderIntent) -> Result<CommitOutcome, LedgerError> {
        let product_id = intent.product_id;
        let mut tx = self.pool.begin().await.map_err(|e| database_error(&e))?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            r"
            INSERT INTO orders (intent_id, buyer_id, product_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (intent_id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(intent.intent_id)
        .bind(intent.buyer_id.get())
        .bind(product_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                LedgerError::ProductNotFound(product_id)
            }
            _ => database_error(&e),
        })?;

        let Some((order_id,)) = inserted else {
            tx.rollback().await.map_err(|e| database_error(&e))?;
            tracing::debug!("Order for this intent already exists");
            return Ok(CommitOutcome::Duplicate {
                intent_id: intent.intent_id,
            });
        };

        let decremented: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE products
            SET quantity = quantity - 1
            WHERE id = $1 AND quantity > 0
            RETURNING quantity
            ",
        )
        .bind(product_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| database_error(&e))?;

        let Some((remaining,)) = decremented else {
            tx.rollback().await.map_err(|e| database_error(&e))?;
            return Err(match self.find_product(product_id).await? {
                Some(_) => LedgerError::OutOfStock(product_id),
                None => LedgerError::ProductNotFound(product_id),
            });
        };

        tx.commit().await.map_err(|e| database_error(&e))?;

        Ok(CommitOutcome::Committed(CommittedOrder {
            order: Order {
                id: OrderId::new(order_id),
                intent_id: intent.intent_id,
                buyer_id: intent.buyer_id,
                product_id,
            },
            remaining,
        }))
    }
}

impl DurableLedger for PostgresLedger {
    fn product(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<Product>, LedgerError>> {
        Box::pin(self.find_product(product_id))
    }

    fn commit_order<'a>(
        &'a self,
        intent: &'a OrderIntent,
    ) -> BoxFuture<'a, Result<CommitOutcome, LedgerError>> {
        Box::pin(self.commit(intent))
    }
}
