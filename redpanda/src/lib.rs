//! Redpanda order channel for the flash sale pipeline.
//!
//! Implements both sides of the durable handoff between admission and
//! fulfillment over a Kafka-compatible topic using rdkafka:
//!
//! - [`OrderChannel`]: the admission gate enqueues each [`OrderIntent`] as a JSON
//!   record and waits for the broker acknowledgement (`acks=all` by default)
//! - [`IntentSource`]: each fulfillment worker consumes through a shared consumer
//!   group and settles every [`Delivery`] it is handed
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A consumer hands out one delivery at a time and waits for its settlement
//! - `ack` commits the offset
//! - `nack` re-publishes the intent with its attempt count incremented, then
//!   commits the original offset
//! - A delivery dropped without settlement is never committed; the consumer
//!   stops and the record is redelivered after the group rebalances
//!
//! The attempt count travels in the [`DELIVERY_ATTEMPT_HEADER`] record header.
//!
//! # Example
//!
//! ```no_run
//! use flash_sale_core::{BuyerId, OrderChannel, OrderIntent, ProductId, Utc};
//! use flash_sale_redpanda::RedpandaOrderChannel;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = RedpandaOrderChannel::builder()
//!     .brokers("localhost:9092")
//!     .topic("buy_orders")
//!     .build()?;
//!
//! let intent = OrderIntent::new(BuyerId::new(7), ProductId::new(1), Utc::now());
//! channel.enqueue(&intent).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flash_sale_core::{
    ChannelError, Delivery, DeliveryStream, IntentSource, OrderChannel, OrderIntent, Settlement,
};
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Default topic carrying order intents.
pub const DEFAULT_TOPIC: &str = "buy_orders";

/// Default consumer group shared by fulfillment workers.
pub const DEFAULT_CONSUMER_GROUP: &str = "flash-sale-fulfillment";

/// Record header holding the 1-based delivery attempt.
pub const DELIVERY_ATTEMPT_HEADER: &str = "x-delivery-attempt";

/// Headroom kept between the producer's delivery timeout and a caller's bound.
pub const DELIVERY_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// Producer delivery timeout that expires strictly before `bound`.
///
/// librdkafka cannot withdraw a queued record, so a caller that stops waiting
/// first may report a failure for a record that is still delivered. Keeping the
/// producer's `message.timeout.ms` inside the caller's bound makes the producer
/// report the failure itself.
#[must_use]
pub fn delivery_timeout_within(bound: Duration) -> Duration {
    let timeout = if bound > DELIVERY_TIMEOUT_MARGIN * 2 {
        bound.saturating_sub(DELIVERY_TIMEOUT_MARGIN)
    } else {
        bound / 2
    };
    timeout.max(Duration::from_millis(1))
}

/// Read the delivery attempt from a header value.
///
/// Records without a readable header count as a first delivery.
fn parse_attempt(value: Option<&[u8]>) -> u32 {
    value
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .and_then(|text| text.trim().parse::<u32>().ok())
        .map_or(1, |attempt| attempt.max(1))
}

fn attempt_headers(attempt: u32) -> OwnedHeaders {
    let value = attempt.to_string();
    OwnedHeaders::new().insert(Header {
        key: DELIVERY_ATTEMPT_HEADER,
        value: Some(value.as_str()),
    })
}

fn delivery_attempt(message: &BorrowedMessage<'_>) -> u32 {
    let value = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == DELIVERY_ATTEMPT_HEADER)
            .and_then(|header| header.value)
    });
    parse_attempt(value)
}

/// Redpanda-backed order channel.
///
/// Cheap to share: the producer is reference-counted internally and every call to
/// [`consume`](IntentSource::consume) creates its own consumer in the configured group.
#[derive(Clone)]
pub struct RedpandaOrderChannel {
    /// Kafka producer for enqueueing intents
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Topic carrying intents
    topic: String,
    /// Consumer group shared by workers
    consumer_group: String,
    /// Producer timeout
    timeout: Duration,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl std::fmt::Debug for RedpandaOrderChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaOrderChannel")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("consumer_group", &self.consumer_group)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedpandaOrderChannel {
    /// Create a channel with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, ChannelError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the channel.
    #[must_use]
    pub fn builder() -> RedpandaOrderChannelBuilder {
        RedpandaOrderChannelBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic carrying intents.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Producer delivery timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch topic metadata to confirm the brokers answer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] if no broker responds within the
    /// producer timeout.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic), Timeout::After(timeout))
                .map(|_| ())
                .map_err(|e| ChannelError::Unavailable(format!("Broker metadata unavailable: {e}")))
        })
        .await
        .map_err(|e| ChannelError::Unavailable(format!("Metadata task failed: {e}")))?
    }

    /// Enqueue without waiting for producer queue space.
    ///
    /// Once a record is queued only `message.timeout.ms` bounds it, so a wait for
    /// queue space would push its outcome past the caller's bound.
    async fn send(&self, intent: &OrderIntent, attempt: u32) -> Result<(), ChannelError> {
        send_intent(&self.producer, &self.topic, Duration::ZERO, intent, attempt).await
    }
}

async fn send_intent(
    producer: &FutureProducer,
    topic: &str,
    queue_timeout: Duration,
    intent: &OrderIntent,
    attempt: u32,
) -> Result<(), ChannelError> {
    let payload = intent
        .to_json()
        .map_err(|e| ChannelError::Serialization(format!("Failed to serialize intent: {e}")))?;
    let key = intent.intent_id.to_string();

    let record = FutureRecord::to(topic)
        .payload(&payload)
        .key(&key)
        .headers(attempt_headers(attempt));

    match producer.send(record, Timeout::After(queue_timeout)).await {
        Ok((partition, offset)) => {
            tracing::debug!(
                topic,
                partition,
                offset,
                intent_id = %intent.intent_id,
                attempt,
                "Intent enqueued"
            );
            Ok(())
        }
        Err((kafka_error, _)) => {
            tracing::error!(
                topic,
                error = %kafka_error,
                intent_id = %intent.intent_id,
                "Failed to enqueue intent"
            );
            Err(ChannelError::Unavailable(kafka_error.to_string()))
        }
    }
}

/// Builder for configuring a [`RedpandaOrderChannel`].
///
/// # Example
///
/// ```no_run
/// use flash_sale_redpanda::RedpandaOrderChannel;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = RedpandaOrderChannel::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("fulfillment")
///     .timeout(Duration::from_secs(2))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug)]
pub struct RedpandaOrderChannelBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaOrderChannelBuilder {
    /// Comma-separated broker addresses (e.g., "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic carrying intents. Default: [`DEFAULT_TOPIC`].
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Consumer group shared by workers. Default: [`DEFAULT_CONSUMER_GROUP`].
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all", so an enqueue only succeeds once the record is replicated.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Producer delivery timeout (`message.timeout.ms`). Default: 5 seconds.
    ///
    /// When callers bound [`enqueue`](OrderChannel::enqueue) themselves, this must
    /// be strictly smaller than their bound; use [`delivery_bound`](Self::delivery_bound).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fit the producer timeout inside a caller's enqueue bound.
    ///
    /// The producer gives up [`DELIVERY_TIMEOUT_MARGIN`] before `bound` (or at half
    /// of very short bounds), so an enqueue reported as failed is never delivered
    /// late.
    #[must_use]
    pub fn delivery_bound(self, bound: Duration) -> Self {
        self.timeout(delivery_timeout_within(bound))
    }

    /// Where a new consumer group starts reading. Default: "earliest", so intents
    /// enqueued before the first worker joined are still fulfilled.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaOrderChannel`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] if brokers are not set or the producer
    /// cannot be created.
    pub fn build(self) -> Result<RedpandaOrderChannel, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::Unavailable("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        // librdkafka reads 0 as "no timeout"
        let timeout = self
            .timeout
            .unwrap_or(Duration::from_secs(5))
            .max(Duration::from_millis(1));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .create()
            .map_err(|e| ChannelError::Unavailable(format!("Failed to create producer: {e}")))?;

        let channel = RedpandaOrderChannel {
            producer,
            brokers,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            timeout,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        };

        tracing::info!(
            brokers = %channel.brokers,
            topic = %channel.topic,
            consumer_group = %channel.consumer_group,
            acks,
            "RedpandaOrderChannel created successfully"
        );

        Ok(channel)
    }
}

impl OrderChannel for RedpandaOrderChannel {
    fn enqueue<'a>(&'a self, intent: &'a OrderIntent) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(self.send(intent, 1))
    }
}

impl IntentSource for RedpandaOrderChannel {
    #[allow(clippy::too_many_lines)] // One loop owns the consumer and every settlement path
    fn consume(&self) -> BoxFuture<'_, Result<DeliveryStream, ChannelError>> {
        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &self.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| ChannelError::Unavailable(format!("Failed to create consumer: {e}")))?;

            consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
                ChannelError::Unavailable(format!("Failed to subscribe to {}: {e}", self.topic))
            })?;

            tracing::info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                manual_commit = true,
                "Consuming order intents"
            );

            // Capacity 1: the next record is not read until the previous one is settled.
            let (tx, mut rx) = tokio::sync::mpsc::channel(1);
            let producer = self.producer.clone();
            let topic = self.topic.clone();
            let timeout = self.timeout;

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            let err = ChannelError::Transport(format!("Failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let decoded = message
                        .payload()
                        .ok_or_else(|| "Message has no payload".to_string())
                        .and_then(|payload| {
                            OrderIntent::from_json(payload).map_err(|e| e.to_string())
                        });

                    let intent = match decoded {
                        Ok(intent) => intent,
                        Err(reason) => {
                            // Redelivering a payload that never decodes would block the partition.
                            tracing::error!(
                                partition = message.partition(),
                                offset = message.offset(),
                                reason,
                                "Discarding undecodable intent"
                            );
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(error = %e, "Failed to commit undecodable intent");
                            }
                            continue;
                        }
                    };

                    let attempt = delivery_attempt(&message);
                    let (delivery, settled) = Delivery::new(intent.clone(), attempt);

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Delivery receiver dropped, exiting consumer task");
                        break;
                    }

                    match settled.await {
                        Ok(Settlement::Ack) => {}
                        Ok(Settlement::Nack) => {
                            let retry = attempt.saturating_add(1);
                            if let Err(e) =
                                send_intent(&producer, &topic, timeout, &intent, retry).await
                            {
                                // Leave the offset uncommitted; the group redelivers it.
                                let _ = tx.send(Err(ChannelError::Transport(format!(
                                    "Failed to requeue intent {}: {e}",
                                    intent.intent_id
                                ))))
                                .await;
                                break;
                            }
                        }
                        Err(_) => {
                            tracing::warn!(
                                intent_id = %intent.intent_id,
                                offset = message.offset(),
                                "Delivery dropped without settlement, stopping consumer"
                            );
                            break;
                        }
                    }

                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            error = %e,
                            "Failed to commit offset (intent may be redelivered)"
                        );
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_order_channel_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaOrderChannel>();
        assert_sync::<RedpandaOrderChannel>();
    }

    #[test]
    fn delivery_timeout_expires_before_the_bound() {
        assert_eq!(
            delivery_timeout_within(Duration::from_secs(5)),
            Duration::from_millis(4500)
        );
        assert_eq!(
            delivery_timeout_within(Duration::from_millis(600)),
            Duration::from_millis(300)
        );
        assert_eq!(
            delivery_timeout_within(Duration::ZERO),
            Duration::from_millis(1)
        );
        for millis in [2, 10, 999, 1000, 1001, 5000, 60_000] {
            let bound = Duration::from_millis(millis);
            assert!(delivery_timeout_within(bound) < bound, "bound {bound:?}");
        }
    }

    #[test]
    fn delivery_bound_sets_the_producer_timeout() {
        let channel = RedpandaOrderChannel::builder()
            .brokers("localhost:9092")
            .delivery_bound(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(channel.timeout(), Duration::from_millis(4500));
    }

    #[test]
    fn zero_timeout_is_not_unbounded() {
        let channel = RedpandaOrderChannel::builder()
            .brokers("localhost:9092")
            .timeout(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(channel.timeout(), Duration::from_millis(1));
    }

    #[test]
    fn build_requires_brokers() {
        let error = RedpandaOrderChannel::builder().build().err();
        assert_eq!(
            error,
            Some(ChannelError::Unavailable("Brokers not configured".to_string()))
        );
    }

    #[test]
    fn attempt_header_parsing() {
        assert_eq!(parse_attempt(Some(&b"3"[..])), 3);
        assert_eq!(parse_attempt(None), 1);
        assert_eq!(parse_attempt(Some(&b"zero"[..])), 1);
        assert_eq!(parse_attempt(Some(&b"0"[..])), 1);
    }

    #[test]
    fn attempt_headers_carry_the_count() {
        let headers = attempt_headers(4);
        let found: Vec<(&str, Option<&[u8]>)> =
            headers.iter().map(|header| (header.key, header.value)).collect();
        assert_eq!(found, vec![(DELIVERY_ATTEMPT_HEADER, Some(&b"4"[..]))]);
    }
}
