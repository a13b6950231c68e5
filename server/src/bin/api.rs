//! Flash sale HTTP process.
//!
//! Serves the purchase endpoint and the live-update websocket, seeds the stock
//! counter from the ledger at startup and relays stock updates to connected
//! viewers.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin api
//! ```

use flash_sale_runtime::metrics::MetricsServer;
use flash_sale_runtime::{AdmissionGate, StockRelay, SubscriberRegistry, seed_stock};
use flash_sale_server::telemetry::{init_tracing, serve_metrics, shutdown_signal};
use flash_sale_server::{Config, Resources};
use flash_sale_web::{AppState, router};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting flash sale API");

    let config = Config::from_env()?;
    info!(
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        strategy = %config.pipeline.admission_strategy,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut metrics = MetricsServer::new(config.server.metrics_addr().parse()?);
    metrics.start()?;
    let metrics_task = tokio::spawn(serve_metrics(Arc::new(metrics), shutdown_tx.subscribe()));

    let resources = Resources::connect(&config).await?;

    seed_stock(
        resources.ledger.as_ref(),
        resources.counter.as_ref(),
        config.pipeline.seed_product_id,
    )
    .await?;

    let registry = Arc::new(SubscriberRegistry::new());
    let relay = StockRelay::new(
        resources.broadcast.clone(),
        Arc::clone(&registry),
        config.connect.retry_policy(),
    );
    let relay_health = relay.health();
    let relay_task = relay.spawn_supervised(shutdown_tx.subscribe());

    let gate = AdmissionGate::new(resources.counter.clone(), resources.orders.clone())
        .with_strategy(config.pipeline.admission_strategy)
        .with_enqueue_timeout(config.pipeline.enqueue_timeout);
    let state = AppState::new(gate, registry)
        .with_settings(config.server.web_settings())
        .with_relay_health(relay_health);

    let addr = config.server.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    if let Err(e) = relay_task.await {
        error!(error = %e, "Stock relay task failed");
    }
    match metrics_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Metrics endpoint failed"),
        Err(e) => error!(error = %e, "Metrics task failed"),
    }

    info!("Flash sale API stopped");
    Ok(())
}
