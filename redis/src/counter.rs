//! Redis-backed stock counter.
//!
//! # Keys
//!
//! - `product:{product_id}:stock` → integer remaining units
//!
//! `DECR`, `INCR` and `SET` are atomic on the server, so concurrent admission
//! requests never lose an update. The conditional decrement runs as a Lua
//! script for the same reason.

use flash_sale_core::{CounterError, ProductId, StockCounter};
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError, Script};

/// Decrement only when the stored value is positive.
///
/// Returns the new value, or `-1` when nothing was taken. A missing key counts as `0`.
const DECREMENT_IF_AVAILABLE: &str = r"
local stock = tonumber(redis.call('GET', KEYS[1]) or '0')
if stock == nil then
    return redis.error_reply('value is not an integer or out of range')
end
if stock > 0 then
    return redis.call('DECR', KEYS[1])
end
return -1
";

/// `Redis` stock counter.
///
/// # Example
///
/// ```no_run
/// use flash_sale_core::{ProductId, StockCounter};
/// use flash_sale_redis::RedisStockCounter;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let counter = RedisStockCounter::new("redis://127.0.0.1:6379").await?;
/// counter.set(ProductId::new(1), 100).await?;
/// let remaining = counter.decrement(ProductId::new(1)).await?;
/// assert_eq!(remaining, 99);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStockCounter {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    decrement_if_available: Script,
}

impl RedisStockCounter {
    /// Create a new `Redis` stock counter.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Unavailable`] if connection to `Redis` fails.
    pub async fn new(redis_url: &str) -> Result<Self, CounterError> {
        let client = Client::open(redis_url).map_err(|e| {
            CounterError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CounterError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self::from_manager(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            decrement_if_available: Script::new(DECREMENT_IF_AVAILABLE),
        }
    }

    /// Map a `Redis` error for `product_id`.
    ///
    /// Server replies (such as `DECR` on a non-integer) are data problems;
    /// everything else means the store could not be reached.
    fn map_error(product_id: ProductId, error: &RedisError) -> CounterError {
        if error.kind() == ErrorKind::ResponseError {
            CounterError::InvalidValue {
                product_id,
                reason: error.to_string(),
            }
        } else {
            CounterError::Unavailable(error.to_string())
        }
    }

    fn parse_stock(product_id: ProductId, raw: Option<String>) -> Result<i64, CounterError> {
        raw.map_or(Ok(0), |value| {
            value.trim().parse().map_err(|_| CounterError::InvalidValue {
                product_id,
                reason: format!("expected an integer, found {value:?}"),
            })
        })
    }
}

impl std::fmt::Debug for RedisStockCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStockCounter").finish_non_exhaustive()
    }
}

impl StockCounter for RedisStockCounter {
    fn decrement(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let remaining: i64 = conn
                .decr(product_id.stock_key(), 1)
                .await
                .map_err(|e| Self::map_error(product_id, &e))?;
            Ok(remaining)
        })
    }

    fn increment(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: i64 = conn
                .incr(product_id.stock_key(), 1)
                .await
                .map_err(|e| Self::map_error(product_id, &e))?;
            Ok(value)
        })
    }

    fn decrement_if_available(
        &self,
        product_id: ProductId,
    ) -> BoxFuture<'_, Result<Option<i64>, CounterError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let result: i64 = self
                .decrement_if_available
                .key(product_id.stock_key())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| Self::map_error(product_id, &e))?;
            Ok((result >= 0).then_some(result))
        })
    }

    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Result<i64, CounterError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let raw: Option<String> = conn
                .get(product_id.stock_key())
                .await
                .map_err(|e| Self::map_error(product_id, &e))?;
            Self::parse_stock(product_id, raw)
        })
    }

    fn set(&self, product_id: ProductId, value: i64) -> BoxFuture<'_, Result<(), CounterError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set(product_id.stock_key(), value)
                .await
                .map_err(|e| Self::map_error(product_id, &e))?;

            tracing::debug!(product_id = %product_id, value, "Stock counter set");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn missing_key_reads_as_zero() {
        assert_eq!(RedisStockCounter::parse_stock(ProductId::new(1), None), Ok(0));
    }

    #[test]
    fn stored_integer_is_parsed() {
        let parsed = RedisStockCounter::parse_stock(ProductId::new(1), Some("42".to_string()));
        assert_eq!(parsed, Ok(42));
    }

    #[test]
    fn garbage_is_an_invalid_value() {
        let parsed = RedisStockCounter::parse_stock(ProductId::new(3), Some("lots".to_string()));
        assert!(matches!(
            parsed,
            Err(CounterError::InvalidValue { product_id, .. }) if product_id == ProductId::new(3)
        ));
    }

    #[test]
    fn server_replies_are_data_errors() {
        let error = RedisError::from((ErrorKind::ResponseError, "value is not an integer"));
        assert!(matches!(
            RedisStockCounter::map_error(ProductId::new(1), &error),
            CounterError::InvalidValue { .. }
        ));

        let error = RedisError::from((ErrorKind::IoError, "connection refused"));
        assert!(matches!(
            RedisStockCounter::map_error(ProductId::new(1), &error),
            CounterError::Unavailable(_)
        ));
    }

    async fn local_counter() -> RedisStockCounter {
        RedisStockCounter::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn decrement_below_zero_then_compensate() {
        let counter = local_counter().await;
        let product = ProductId::new(900_001);
        counter.set(product, 1).await.unwrap();

        assert_eq!(counter.decrement(product).await.unwrap(), 0);
        assert_eq!(counter.decrement(product).await.unwrap(), -1);
        assert_eq!(counter.increment(product).await.unwrap(), 0);
        assert_eq!(counter.get(product).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn conditional_decrement_stops_at_zero() {
        let counter = local_counter().await;
        let product = ProductId::new(900_002);
        counter.set(product, 2).await.unwrap();

        assert_eq!(counter.decrement_if_available(product).await.unwrap(), Some(1));
        assert_eq!(counter.decrement_if_available(product).await.unwrap(), Some(0));
        assert_eq!(counter.decrement_if_available(product).await.unwrap(), None);
        assert_eq!(counter.get(product).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore] // Requires Redis running
    async fn concurrent_decrements_hand_out_each_unit_once() {
        let counter = local_counter().await;
        let product = ProductId::new(900_003);
        counter.set(product, 10).await.unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.decrement_if_available(product).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                granted += 1;
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(counter.get(product).await.unwrap(), 0);
    }
}
