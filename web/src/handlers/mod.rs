//! HTTP request handlers.

pub mod frontend;
pub mod health;
pub mod purchase;
pub mod websocket;

pub use health::{health_check, readiness};
pub use purchase::{PurchaseAccepted, PurchaseRequest, buy};
