//! Live stock updates over WebSocket.
//!
//! ```text
//! Relay ──► SubscriberRegistry ──try_send──► outbound queue ──► socket writer ──► viewer
//! ```
//!
//! Each connection registers one [`Subscriber`]. The registry only ever enqueues
//! into the bounded outbound queue; this module's writer task drains it onto the
//! socket with every write bounded by [`WebSettings::write_timeout`](crate::state::WebSettings).
//!
//! Server → client messages are the raw stock update JSON:
//!
//! ```json
//! {"product_id": 1, "stock": 41}
//! ```
//!
//! Nothing is expected from the client beyond keep-alive frames.

use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use flash_sale_runtime::{Subscriber, SubscriberRegistry};
use futures::{SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upgrade to a live-update WebSocket.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let registry = Arc::clone(&state.registry);
    let capacity = state.settings.subscriber_queue_capacity;
    let write_timeout = state.settings.write_timeout;
    ws.on_upgrade(move |socket| serve_viewer(socket, registry, capacity, write_timeout))
}

/// Serve one viewer until either side goes away.
///
/// Runs two tasks:
/// 1. **Writer**: drain the outbound queue onto the socket
/// 2. **Reader**: consume keep-alive frames until the client closes
async fn serve_viewer(
    socket: WebSocket,
    registry: Arc<SubscriberRegistry>,
    capacity: usize,
    write_timeout: Duration,
) {
    let (subscriber, mut inbox) = Subscriber::channel(capacity);
    let id = registry.add(subscriber).await;
    info!(subscriber = %id, "Viewer connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = inbox.recv().await {
            match tokio::time::timeout(write_timeout, sender.send(Message::Text(payload))).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    debug!(subscriber = %id, %error, "Viewer write failed");
                    break;
                }
                Err(_) => {
                    warn!(subscriber = %id, ?write_timeout, "Viewer write timed out, disconnecting");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                debug!(subscriber = %id, "Viewer requested close");
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    registry.remove(id).await;
    info!(subscriber = %id, "Viewer disconnected");
}
