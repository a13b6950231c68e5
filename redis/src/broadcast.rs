//! Redis pub/sub broadcast of stock updates.
//!
//! Events are published as JSON on [`STOCK_UPDATES_CHANNEL`]. Redis pub/sub
//! keeps nothing: subscribers only see what is published while they are
//! connected.

use flash_sale_core::{
    BroadcastChannel, BroadcastError, STOCK_UPDATES_CHANNEL, StockUpdateEvent, StockUpdateStream,
};
use futures::StreamExt;
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// `Redis` pub/sub broadcast channel.
///
/// Publishing shares one [`ConnectionManager`]; every
/// [`subscribe`](BroadcastChannel::subscribe) opens its own dedicated
/// pub/sub connection, as `Redis` requires.
#[derive(Clone)]
pub struct RedisBroadcastChannel {
    client: Client,
    conn_manager: ConnectionManager,
    channel: String,
}

impl RedisBroadcastChannel {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Unavailable`] if connection to `Redis` fails.
    pub async fn new(redis_url: &str) -> Result<Self, BroadcastError> {
        let client = Client::open(redis_url).map_err(|e| {
            BroadcastError::Unavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            BroadcastError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            client,
            conn_manager,
            channel: STOCK_UPDATES_CHANNEL.to_string(),
        })
    }

    /// Use a different pub/sub channel name.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// The pub/sub channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl std::fmt::Debug for RedisBroadcastChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroadcastChannel")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Decode one pub/sub payload, or `None` if it is not a stock update.
fn decode(payload: &str) -> Option<StockUpdateEvent> {
    match StockUpdateEvent::from_json(payload) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(%error, payload, "Skipping malformed stock update");
            None
        }
    }
}

impl BroadcastChannel for RedisBroadcastChannel {
    fn publish<'a>(
        &'a self,
        event: &'a StockUpdateEvent,
    ) -> BoxFuture<'a, Result<(), BroadcastError>> {
        Box::pin(async move {
            let payload = event
                .to_json()
                .map_err(|e| BroadcastError::Serialization(e.to_string()))?;

            let mut conn = self.conn_manager.clone();
            let receivers: i64 = conn
                .publish(&self.channel, payload)
                .await
                .map_err(|e| BroadcastError::PublishFailed(e.to_string()))?;

            tracing::debug!(
                product_id = %event.product_id,
                stock = event.stock,
                receivers,
                "Stock update published"
            );
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<StockUpdateStream, BroadcastError>> {
        Box::pin(async move {
            let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
                BroadcastError::Unavailable(format!("Failed to open pub/sub connection: {e}"))
            })?;

            pubsub.subscribe(&self.channel).await.map_err(|e| {
                BroadcastError::Unavailable(format!("Failed to subscribe to {}: {e}", self.channel))
            })?;

            tracing::info!(channel = %self.channel, "Subscribed to stock updates");

            let stream = async_stream::stream! {
                let mut messages = Box::pin(pubsub.into_on_message());
                while let Some(message) = messages.next().await {
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(error) => {
                            tracing::warn!(%error, "Skipping non-text pub/sub payload");
                            continue;
                        }
                    };
                    if let Some(event) = decode(&payload) {
                        yield event;
                    }
                }
                tracing::info!("Stock update subscription closed");
            };

            Ok(Box::pin(stream) as StockUpdateStream)
        })
    }
}
