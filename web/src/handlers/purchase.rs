//! Purchase endpoint.
//!
//! ```text
//! POST /api/buy   {"buyer_id": 7, "product_id": 1}
//! ```
//!
//! | Outcome | Status | Body |
//! |---------|--------|------|
//! | admitted | 202 | `{"message": ..., "remaining_stock": n, "status": "queued"}` |
//! | sold out | 400 | `{"error": "Sold out"}` |
//! | malformed body | 400 | `{"error": "Invalid request"}` |
//! | counter or queue failure | 500 | `{"error": ...}` |

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use flash_sale_core::{BuyerId, ProductId};
use flash_sale_runtime::{ReserveOutcome, UnavailableReason};
use serde::{Deserialize, Serialize};

/// Purchase request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Buyer attempting the purchase
    #[serde(alias = "user_id")]
    pub buyer_id: i64,
    /// Product being bought
    pub product_id: i64,
}

/// Body of a `202 Accepted` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseAccepted {
    /// Human-readable confirmation
    pub message: String,
    /// Fast-path stock left after this reservation
    pub remaining_stock: i64,
    /// Always `"queued"`
    pub status: String,
}

/// Reserve one unit and queue the order for fulfillment.
///
/// # Errors
///
/// Returns [`AppError`] with 400 for sold out or malformed bodies, 500 when the
/// counter or order queue is unavailable.
#[tracing::instrument(name = "http.buy", skip_all)]
pub async fn buy(
    State(state): State<AppState>,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PurchaseAccepted>), AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected purchase body");
        AppError::bad_request("Invalid request")
    })?;

    let outcome = state
        .gate
        .reserve(
            ProductId::new(request.product_id),
            BuyerId::new(request.buyer_id),
        )
        .await;

    match outcome {
        ReserveOutcome::Admitted { remaining, .. } => Ok((
            StatusCode::ACCEPTED,
            Json(PurchaseAccepted {
                message: "Order received, processing in background".to_string(),
                remaining_stock: remaining,
                status: "queued".to_string(),
            }),
        )),
        ReserveOutcome::SoldOut => Err(AppError::bad_request("Sold out")),
        ReserveOutcome::Unavailable(reason) => {
            let message = match reason {
                UnavailableReason::CounterUnavailable(_) => "Stock counter unavailable",
                UnavailableReason::ChannelUnavailable(_) => "Failed to queue order",
            };
            Err(AppError::internal(message).with_source(reason.into()))
        }
    }
}
