//! HTTP tests for the router using axum-test

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::http::StatusCode;
use axum_test::TestServer;
use flash_sale_core::{BuyerId, ProductId, StockUpdateEvent};
use flash_sale_runtime::{AdmissionGate, RelayHealth, RetryPolicy, StockRelay, SubscriberRegistry};
use flash_sale_testing::{InMemoryBroadcastChannel, InMemoryOrderChannel, InMemoryStockCounter};
use flash_sale_web::handlers::{PurchaseAccepted, health::Liveness, health::Readiness};
use flash_sale_web::{AppState, WebSettings, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const PRODUCT: ProductId = ProductId::new(1);

struct Harness {
    counter: InMemoryStockCounter,
    channel: InMemoryOrderChannel,
    registry: Arc<SubscriberRegistry>,
    state: AppState,
}

impl Harness {
    fn with_stock(stock: i64) -> Self {
        let counter = InMemoryStockCounter::new().with_stock(PRODUCT, stock);
        let channel = InMemoryOrderChannel::new();
        let registry = Arc::new(SubscriberRegistry::new());
        let gate = AdmissionGate::new(Arc::new(counter.clone()), Arc::new(channel.clone()));
        let state = AppState::new(gate, Arc::clone(&registry));
        Self {
            counter,
            channel,
            registry,
            state,
        }
    }

    fn server(&self) -> TestServer {
        TestServer::new(router(self.state.clone())).unwrap()
    }
}

#[tokio::test]
async fn admitted_purchase_is_queued() {
    let harness = Harness::with_stock(5);
    let server = harness.server();

    let response = server
        .post("/api/buy")
        .json(&json!({"buyer_id": 7, "product_id": 1}))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: PurchaseAccepted = response.json();
    assert_eq!(body.remaining_stock, 4);
    assert_eq!(body.status, "queued");

    let enqueued = harness.channel.enqueued();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].buyer_id, BuyerId::new(7));
    assert_eq!(enqueued[0].product_id, PRODUCT);
}

#[tokio::test]
async fn legacy_user_id_field_is_accepted() {
    let harness = Harness::with_stock(1);
    let server = harness.server();

    let response = server
        .post("/api/buy")
        .json(&json!({"user_id": 3, "product_id": 1}))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(harness.channel.enqueued()[0].buyer_id, BuyerId::new(3));
}

#[tokio::test]
async fn sold_out_is_a_bad_request() {
    let harness = Harness::with_stock(0);
    let server = harness.server();

    let response = server
        .post("/api/buy")
        .json(&json!({"buyer_id": 7, "product_id": 1}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"error": "Sold out"}));
    assert_eq!(harness.counter.value(PRODUCT), 0);
    assert!(harness.channel.enqueued().is_empty());
}

#[tokio::test]
async fn malformed_body_is_an_invalid_request() {
    let harness = Harness::with_stock(5);
    let server = harness.server();

    let response = server
        .post("/api/buy")
        .json(&json!({"buyer_id": "seven"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"error": "Invalid request"}));
    assert_eq!(harness.counter.value(PRODUCT), 5);
}

#[tokio::test]
async fn queue_failure_is_a_server_error_and_compensated() {
    let harness = Harness::with_stock(5);
    harness.channel.set_failing(true);
    let server = harness.server();

    let response = server
        .post("/api/buy")
        .json(&json!({"buyer_id": 7, "product_id": 1}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.assert_json(&json!({"error": "Failed to queue order"}));
    assert_eq!(harness.counter.value(PRODUCT), 5);
}

#[tokio::test]
async fn counter_outage_is_a_server_error() {
    let harness = Harness::with_stock(5);
    harness.counter.set_unavailable(true);
    let server = harness.server();

    let response = server
        .post("/api/buy")
        .json(&json!({"buyer_id": 7, "product_id": 1}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert!(body["error"].is_string());
    assert!(harness.channel.enqueued().is_empty());
}

#[tokio::test]
async fn health_and_readiness() {
    let harness = Harness::with_stock(1);
    let server = harness.server();

    let health = server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Liveness>().status, "ok");

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(
        ready.json::<Readiness>(),
        Readiness {
            status: "ready".to_string(),
            subscribers: 0,
            live_updates: true,
        }
    );
}

#[tokio::test]
async fn readiness_is_degraded_while_relay_is_unsubscribed() {
    let harness = Harness::with_stock(1);
    let state = harness.state.clone().with_relay_health(RelayHealth::default());
    let server = TestServer::new(router(state)).unwrap();

    let ready = server.get("/ready").await;
    ready.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body = ready.json::<Readiness>();
    assert_eq!(body.status, "degraded");
    assert!(!body.live_updates);
}

#[tokio::test]
async fn readiness_recovers_once_relay_subscribes() {
    let harness = Harness::with_stock(1);
    let channel = InMemoryBroadcastChannel::new();
    let relay = StockRelay::new(
        Arc::new(channel.clone()),
        Arc::clone(&harness.registry),
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
    );
    let health = relay.health();
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let task = relay.spawn_supervised(shutdown_rx);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !health.is_subscribed() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("relay never subscribed");

    let state = harness.state.clone().with_relay_health(health);
    let server = TestServer::new(router(state)).unwrap();
    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    assert!(ready.json::<Readiness>().live_updates);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn index_is_not_found_without_a_page() {
    let harness = Harness::with_stock(1);
    let server = harness.server();

    server.get("/").await.assert_status_not_found();
}

#[tokio::test]
async fn index_serves_the_configured_page() {
    let path = std::env::temp_dir().join(format!("flash-sale-index-{}.html", std::process::id()));
    std::fs::write(&path, "<h1>Flash Sale</h1>").unwrap();

    let harness = Harness::with_stock(1);
    let state = harness.state.clone().with_settings(WebSettings {
        static_index: Some(path.clone()),
        ..WebSettings::default()
    });
    let server = TestServer::new(router(state)).unwrap();

    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("<h1>Flash Sale</h1>");

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn websocket_viewer_receives_broadcasts() {
    let harness = Harness::with_stock(1);
    let server = TestServer::builder()
        .http_transport()
        .build(router(harness.state.clone()))
        .unwrap();

    let mut socket = server.get_websocket("/ws").await.into_websocket().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("viewer never registered");

    let report = harness
        .registry
        .broadcast(&StockUpdateEvent::new(PRODUCT, 0))
        .await;
    assert_eq!(report.delivered, 1);

    let pushed = tokio::time::timeout(Duration::from_secs(5), socket.receive_text())
        .await
        .expect("no update pushed");
    assert_eq!(pushed, r#"{"product_id":1,"stock":0}"#);
}
