//! Flash sale fulfillment process.
//!
//! Runs `WORKER_CONCURRENCY` independent consumers in the shared consumer
//! group. Each one commits admitted intents to the ledger, publishes the new
//! stock level and dead-letters what it cannot fulfil.
//!
//! # Usage
//!
//! ```bash
//! WORKER_CONCURRENCY=4 cargo run --bin worker
//! ```

use flash_sale_runtime::FulfillmentWorker;
use flash_sale_runtime::metrics::MetricsServer;
use flash_sale_server::telemetry::{init_tracing, serve_metrics, shutdown_signal};
use flash_sale_server::{Config, Resources};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting flash sale fulfillment worker");

    let config = Config::from_env()?;
    info!(
        database_url = %config.postgres.url,
        topic = %config.redpanda.order_topic,
        consumer_group = %config.redpanda.consumer_group,
        ack_mode = %config.pipeline.ack_mode,
        concurrency = config.pipeline.worker_concurrency,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut metrics = MetricsServer::new(config.server.metrics_addr().parse()?);
    metrics.start()?;
    let metrics_task = tokio::spawn(serve_metrics(Arc::new(metrics), shutdown_tx.subscribe()));

    let resources = Resources::connect(&config).await?;

    let workers: Vec<_> = (0..config.pipeline.worker_concurrency.max(1))
        .map(|index| {
            let worker = FulfillmentWorker::new(resources.ledger.clone(), resources.broadcast.clone())
                .with_name(format!("fulfillment-{index}"))
                .with_dead_letters(resources.dead_letters.clone())
                .with_ack_mode(config.pipeline.ack_mode)
                .with_max_deliveries(config.pipeline.max_deliveries)
                .with_reconnect_policy(config.connect.retry_policy());
            Arc::new(worker).spawn(resources.orders.clone(), shutdown_tx.subscribe())
        })
        .collect();
    info!(workers = workers.len(), "Fulfillment workers running, press Ctrl+C to stop");

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    for handle in workers {
        if let Err(e) = handle.await {
            error!(error = %e, "Fulfillment worker task failed");
        }
    }
    match metrics_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Metrics endpoint failed"),
        Err(e) => error!(error = %e, "Metrics task failed"),
    }

    info!("Fulfillment worker stopped");
    Ok(())
}
