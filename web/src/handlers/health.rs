//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use flash_sale_runtime::RelayHealth;
use serde::{Deserialize, Serialize};

/// Liveness response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liveness {
    /// Always `"ok"`
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Readiness response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    /// `"ready"`, or `"degraded"` while the stock relay has no subscription
    pub status: String,
    /// Live-update viewers currently connected
    pub subscribers: usize,
    /// Whether stock updates are reaching viewers (`true` when no relay is attached)
    pub live_updates: bool,
}

/// Simple health check endpoint (for basic liveness).
///
/// Does NOT check dependencies.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Liveness>) {
    (
        StatusCode::OK,
        Json(Liveness {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness with the current viewer count.
///
/// Answers `503` while the stock relay is between subscriptions, so viewers are
/// connected but would miss updates.
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let subscribers = state.registry.len().await;
    let live_updates = state.relay.as_ref().is_none_or(RelayHealth::is_subscribed);
    let (status, label) = if live_updates {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(Readiness {
            status: label.to_string(),
            subscribers,
            live_updates,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }
}
