//! Relay from the broadcast channel to the live subscriber registry.
//!
//! Subscribes to stock updates and fans each one out through
//! [`SubscriberRegistry::broadcast`]. When the subscription cannot be established
//! or is lost, the relay resubscribes with exponential backoff and jitter. Events
//! published while it is disconnected are not recovered.
//!
//! [`StockRelay::run`] gives up after one exhausted backoff cycle.
//! [`StockRelay::supervise`] starts a fresh cycle after each exhausted one and
//! only stops on shutdown; the API process runs the relay that way.

use crate::registry::SubscriberRegistry;
use crate::retry::{RetryPolicy, retry_with_backoff};
use flash_sale_core::{BroadcastChannel, StockUpdateStream};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Errors that stop the relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Every subscription attempt in one reconnect cycle failed
    #[error("Broadcast broker unavailable after {attempts} attempts: {last_error}")]
    BrokerUnavailable {
        /// Attempts made in the failing cycle
        attempts: usize,
        /// Last subscription error
        last_error: String,
    },
}

/// Shared view of whether the relay currently holds a subscription.
#[derive(Debug, Clone, Default)]
pub struct RelayHealth {
    subscribed: Arc<AtomicBool>,
    subscriptions: Arc<AtomicU64>,
}

impl RelayHealth {
    /// Whether stock updates are currently flowing to viewers.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Subscriptions established since the relay was created.
    #[must_use]
    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn mark_subscribed(&self) {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.subscribed.store(true, Ordering::SeqCst);
    }

    fn mark_lost(&self) {
        self.subscribed.store(false, Ordering::SeqCst);
    }
}

/// Moves stock updates from the broker to connected viewers.
pub struct StockRelay {
    channel: Arc<dyn BroadcastChannel>,
    registry: Arc<SubscriberRegistry>,
    policy: RetryPolicy,
    health: RelayHealth,
}

impl StockRelay {
    /// Create a relay that resubscribes according to `policy`.
    #[must_use]
    pub fn new(
        channel: Arc<dyn BroadcastChannel>,
        registry: Arc<SubscriberRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            registry,
            policy,
            health: RelayHealth::default(),
        }
    }

    /// Handle reporting the subscription state.
    #[must_use]
    pub fn health(&self) -> RelayHealth {
        self.health.clone()
    }

    /// Relay until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BrokerUnavailable`] when a full backoff cycle fails to
    /// subscribe.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), RelayError> {
        info!("Stock relay started");
        let result = self.relay(&mut shutdown).await;
        self.health.mark_lost();
        info!("Stock relay stopped");
        result
    }

    /// Relay until `shutdown` fires, surviving broker outages of any length.
    ///
    /// Each exhausted backoff cycle is logged and followed by a jittered pause
    /// before the next one. The pause grows with consecutive failed cycles and
    /// resets once a subscription succeeds again.
    pub async fn supervise(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Stock relay supervisor started");
        let mut outages = 0usize;

        loop {
            let before = self.health.subscriptions();
            match self.relay(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    self.health.mark_lost();
                    warn!(error = %e, "Stock relay cycle exhausted, retrying");
                }
            }

            if self.health.subscriptions() > before {
                outages = 0;
            }
            let delay = self.policy.jittered_delay(outages, &mut rand::thread_rng());
            outages = outages.saturating_add(1);
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.health.mark_lost();
        info!("Stock relay supervisor stopped");
    }

    /// Returns `Ok` when shutdown was requested.
    async fn relay(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), RelayError> {
        loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                subscribed = retry_with_backoff(&self.policy, "broadcast.subscribe", || {
                    self.channel.subscribe()
                }) => subscribed,
            };

            let stream = subscribed.map_err(|e| RelayError::BrokerUnavailable {
                attempts: e.attempts,
                last_error: e.last_error.to_string(),
            })?;

            self.health.mark_subscribed();
            info!("Subscribed to stock updates");
            if self.forward(stream, shutdown).await {
                return Ok(());
            }
            self.health.mark_lost();
            warn!("Stock update subscription lost, resubscribing");
        }
    }

    /// Returns `true` when shutdown was requested.
    async fn forward(
        &self,
        mut stream: StockUpdateStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                next = stream.next() => match next {
                    Some(event) => {
                        let report = self.registry.broadcast(&event).await;
                        debug!(
                            product_id = %event.product_id,
                            stock = event.stock,
                            delivered = report.delivered,
                            evicted = report.evicted,
                            "Stock update relayed"
                        );
                    }
                    None => return false,
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) as a background task.
    #[must_use]
    pub fn spawn(
        self,
        shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<Result<(), RelayError>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Spawn [`supervise`](Self::supervise) as a background task.
    #[must_use]
    pub fn spawn_supervised(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.supervise(shutdown).await })
    }
}
