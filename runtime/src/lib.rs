//! # Flash Sale Runtime
//!
//! The active stages of the flash sale pipeline.
//!
//! ## Core Components
//!
//! - **[`AdmissionGate`]**: reserves a unit on the fast-path counter and enqueues an intent
//! - **[`FulfillmentWorker`]**: commits intents to the ledger and announces new stock levels
//! - **[`SubscriberRegistry`]**: the set of live viewers and the fan-out to them
//! - **[`StockRelay`]**: forwards broadcast events into the registry
//!
//! Supporting modules provide backoff ([`retry`]), startup seeding ([`seeding`]) and
//! Prometheus metrics ([`metrics`]).
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_runtime::{AdmissionGate, ReserveOutcome};
//!
//! let gate = AdmissionGate::new(counter, channel);
//!
//! match gate.reserve(ProductId::new(1), BuyerId::new(7)).await {
//!     ReserveOutcome::Admitted { remaining, .. } => { /* 202 */ }
//!     ReserveOutcome::SoldOut => { /* 400 */ }
//!     ReserveOutcome::Unavailable(_) => { /* 500 */ }
//! }
//! ```

/// Admission control against the fast-path counter
pub mod admission;

/// Transactional fulfillment of admitted intents
pub mod fulfillment;

/// Prometheus metrics for observability
pub mod metrics;

/// Live viewer registry and fan-out
pub mod registry;

/// Broadcast-to-registry relay
pub mod relay;

/// Retry logic with exponential backoff
pub mod retry;

/// Startup seeding of the fast-path counter
pub mod seeding;

pub use admission::{AdmissionGate, AdmissionStrategy, ReserveOutcome, UnavailableReason};
pub use fulfillment::{AckMode, Disposition, FulfillmentError, FulfillmentWorker, ProcessOutcome};
pub use registry::{BroadcastReport, Subscriber, SubscriberId, SubscriberInbox, SubscriberRegistry};
pub use relay::{RelayError, RelayHealth, StockRelay};
pub use retry::{RetryError, RetryPolicy, retry_with_backoff};
pub use seeding::{SeedError, seed_stock};
