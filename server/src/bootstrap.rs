//! Resource bootstrap for the flash sale binaries.
//!
//! Connects every backing store the pipeline needs, retrying each connection
//! with the configured backoff:
//!
//! 1. `PostgreSQL` (ledger + dead letters), then run migrations
//! 2. `Redis` (stock counter and pub/sub broadcast)
//! 3. Redpanda (order channel; the producer is confirmed with a metadata fetch)
//!
//! The producer's delivery timeout is fitted inside `ENQUEUE_TIMEOUT_MS`, so the
//! producer reports a failed enqueue before the admission gate's own bound fires.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let resources = Resources::connect(&config).await?;
//! ```

use crate::config::Config;
use flash_sale_core::{BroadcastError, ChannelError, CounterError, LedgerError};
use flash_sale_postgres::{DeadLetterQueue, PostgresLedger};
use flash_sale_redis::{RedisBroadcastChannel, RedisStockCounter};
use flash_sale_redpanda::RedpandaOrderChannel;
use flash_sale_runtime::{RetryError, retry_with_backoff};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from [`Resources::connect`].
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// `PostgreSQL` never became reachable
    #[error("PostgreSQL unavailable: {0}")]
    Postgres(RetryError<LedgerError>),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    Migration(LedgerError),

    /// The `Redis` stock counter never became reachable
    #[error("Redis stock counter unavailable: {0}")]
    Counter(RetryError<CounterError>),

    /// The `Redis` pub/sub connection never became reachable
    #[error("Redis broadcast unavailable: {0}")]
    Broadcast(RetryError<BroadcastError>),

    /// No Redpanda broker answered
    #[error("Redpanda unavailable: {0}")]
    Redpanda(RetryError<ChannelError>),
}

/// Every connected backing store.
///
/// All handles are wrapped in `Arc` so they can be shared across tasks.
#[derive(Clone)]
pub struct Resources {
    /// Durable ledger
    pub ledger: Arc<PostgresLedger>,
    /// Dead-letter store (same pool as the ledger)
    pub dead_letters: Arc<DeadLetterQueue>,
    /// Fast-path stock counter
    pub counter: Arc<RedisStockCounter>,
    /// Stock update pub/sub
    pub broadcast: Arc<RedisBroadcastChannel>,
    /// Order channel (producer and consumer side)
    pub orders: Arc<RedpandaOrderChannel>,
}

impl Resources {
    /// Connect to every backing store.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when a store is still unreachable after
    /// `CONNECT_MAX_ATTEMPTS` attempts or migrations fail.
    pub async fn connect(config: &Config) -> Result<Self, BootstrapError> {
        let policy = config.connect.retry_policy();

        info!("Connecting to PostgreSQL...");
        let ledger = retry_with_backoff(&policy, "postgres.connect", || {
            PostgresLedger::connect(&config.postgres.url, config.postgres.max_connections)
        })
        .await
        .map_err(BootstrapError::Postgres)?;
        ledger.migrate().await.map_err(BootstrapError::Migration)?;
        let dead_letters = DeadLetterQueue::new(ledger.pool().clone());
        info!("PostgreSQL connected, migrations applied");

        info!("Connecting to Redis...");
        let counter = retry_with_backoff(&policy, "redis.counter.connect", || {
            RedisStockCounter::new(&config.redis.url)
        })
        .await
        .map_err(BootstrapError::Counter)?;
        let broadcast = retry_with_backoff(&policy, "redis.broadcast.connect", || {
            RedisBroadcastChannel::new(&config.redis.url)
        })
        .await
        .map_err(BootstrapError::Broadcast)?
        .with_channel(config.redis.broadcast_channel.clone());
        info!(channel = %broadcast.channel(), "Redis connected");

        info!("Connecting to Redpanda...");
        let orders = retry_with_backoff(&policy, "redpanda.connect", || async {
            let channel = RedpandaOrderChannel::builder()
                .brokers(config.redpanda.brokers.clone())
                .topic(config.redpanda.order_topic.clone())
                .consumer_group(config.redpanda.consumer_group.clone())
                .delivery_bound(config.pipeline.enqueue_timeout)
                .build()?;
            channel.ping().await?;
            Ok::<_, ChannelError>(channel)
        })
        .await
        .map_err(BootstrapError::Redpanda)?;
        info!(brokers = %orders.brokers(), topic = %orders.topic(), "Redpanda connected");

        Ok(Self {
            ledger: Arc::new(ledger),
            dead_letters: Arc::new(dead_letters),
            counter: Arc::new(counter),
            broadcast: Arc::new(broadcast),
            orders: Arc::new(orders),
        })
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("orders", &self.orders)
            .finish_non_exhaustive()
    }
}
