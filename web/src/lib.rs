//! Axum HTTP surface for the flash sale pipeline.
//!
//! # Routes
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/api/buy` | [`handlers::purchase::buy`]: admission fast path |
//! | `GET` | `/ws` | [`handlers::websocket::handle`]: live stock updates |
//! | `GET` | `/health` | [`handlers::health::health_check`]: liveness |
//! | `GET` | `/ready` | [`handlers::health::readiness`]: viewer count |
//! | `GET` | `/` | [`handlers::frontend::index`]: demo page |
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at the purchase handler
//! 2. **Extract** the JSON body (malformed → 400)
//! 3. **Reserve** through the [`AdmissionGate`](flash_sale_runtime::AdmissionGate)
//! 4. **Map** the [`ReserveOutcome`](flash_sale_runtime::ReserveOutcome) to a status code
//!
//! Fulfillment happens later in the worker process; the buyer only ever sees
//! the admission decision.
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(gate, registry);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, flash_sale_web::router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// Re-export key types for convenience
pub use error::AppError;
pub use state::{AppState, WebSettings};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::frontend::index))
        .route("/api/buy", post(handlers::purchase::buy))
        .route("/ws", get(handlers::websocket::handle))
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
