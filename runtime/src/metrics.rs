//! Prometheus metrics for the flash sale pipeline.
//!
//! Covers every stage:
//! - Admission outcomes and latency
//! - Fulfillment outcomes (committed, rejected, retried, dead-lettered, duplicate)
//! - Live subscriber registry size and evictions
//!
//! # Example
//!
//! ```rust,no_run
//! use flash_sale_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Serve `server.render()` on GET /metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the scrape endpoint will be bound to
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should listen on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// If a recorder is already installed (tests create several servers), this
    /// logs a warning, succeeds, and leaves [`handle`](Self::handle) empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics recorder installed - scrape at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Admission
    describe_counter!(
        "flash_sale_admission_admitted_total",
        "Purchase attempts admitted and enqueued"
    );
    describe_counter!(
        "flash_sale_admission_sold_out_total",
        "Purchase attempts rejected because the counter was exhausted"
    );
    describe_counter!(
        "flash_sale_admission_unavailable_total",
        "Purchase attempts rejected because a dependency failed"
    );
    describe_histogram!(
        "flash_sale_admission_duration_seconds",
        "Time taken to decide one purchase attempt"
    );

    // Fulfillment
    describe_counter!(
        "flash_sale_fulfillment_committed_total",
        "Orders committed to the ledger"
    );
    describe_counter!(
        "flash_sale_fulfillment_rejected_total",
        "Intents the ledger refused (out of stock, unknown product)"
    );
    describe_counter!(
        "flash_sale_fulfillment_retried_total",
        "Deliveries handed back for redelivery after a transient failure"
    );
    describe_counter!(
        "flash_sale_fulfillment_dead_lettered_total",
        "Intents moved to the dead letter store"
    );
    describe_counter!(
        "flash_sale_fulfillment_duplicate_total",
        "Redelivered intents that had already been committed"
    );

    // Registry
    describe_gauge!(
        "flash_sale_registry_subscribers",
        "Live viewers currently registered"
    );
    describe_counter!(
        "flash_sale_registry_evicted_total",
        "Viewers evicted for being slow or disconnected"
    );
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record an admitted attempt.
    pub fn record_admitted(duration: Duration) {
        counter!("flash_sale_admission_admitted_total").increment(1);
        histogram!("flash_sale_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a sold-out rejection.
    pub fn record_sold_out(duration: Duration) {
        counter!("flash_sale_admission_sold_out_total").increment(1);
        histogram!("flash_sale_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a dependency failure.
    pub fn record_unavailable(duration: Duration) {
        counter!("flash_sale_admission_unavailable_total").increment(1);
        histogram!("flash_sale_admission_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Fulfillment metrics recorder.
pub struct FulfillmentMetrics;

impl FulfillmentMetrics {
    /// Record a committed order.
    pub fn record_committed() {
        counter!("flash_sale_fulfillment_committed_total").increment(1);
    }

    /// Record a permanent ledger rejection.
    pub fn record_rejected() {
        counter!("flash_sale_fulfillment_rejected_total").increment(1);
    }

    /// Record a nack for redelivery.
    pub fn record_retried() {
        counter!("flash_sale_fulfillment_retried_total").increment(1);
    }

    /// Record a dead-lettered intent.
    pub fn record_dead_lettered() {
        counter!("flash_sale_fulfillment_dead_lettered_total").increment(1);
    }

    /// Record a duplicate delivery.
    pub fn record_duplicate() {
        counter!("flash_sale_fulfillment_duplicate_total").increment(1);
    }
}

/// Subscriber registry metrics recorder.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record the current number of subscribers.
    #[allow(clippy::cast_precision_loss)] // Subscriber counts fit comfortably in f64
    pub fn record_size(size: usize) {
        gauge!("flash_sale_registry_subscribers").set(size as f64);
    }

    /// Record evicted subscribers.
    pub fn record_evicted(count: usize) {
        counter!("flash_sale_registry_evicted_total").increment(count as u64);
    }
}
