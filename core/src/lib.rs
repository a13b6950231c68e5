//! # Flash Sale Core
//!
//! Data model and collaborator traits for the flash sale pipeline.
//!
//! A purchase attempt travels through four stages:
//!
//! ```text
//! buyer ──► AdmissionGate ──► OrderChannel ──► FulfillmentWorker ──► BroadcastChannel ──► viewers
//!              │                                      │
//!              ▼                                      ▼
//!         StockCounter                          DurableLedger
//!       (fast, volatile)                    (authoritative, durable)
//! ```
//!
//! This crate holds only the shared vocabulary: the types that flow between the
//! stages ([`model`]) and the traits each backing store implements
//! ([`counter`], [`ledger`], [`channel`], [`broadcast`], [`dead_letter`]).
//! The stages themselves live in `flash-sale-runtime`; production adapters live in
//! `flash-sale-redis`, `flash-sale-postgres` and `flash-sale-redpanda`; in-memory
//! adapters for tests live in `flash-sale-testing`.
//!
//! ## Invariants
//!
//! - **Oversell prevention**: for any product, the number of committed orders never
//!   exceeds the quantity seeded into the stock counter.
//! - **Authority**: the ledger quantity is only ever decremented, one unit per
//!   committed order, and never drops below zero.
//!
//! ## Dyn Compatibility
//!
//! Every collaborator trait returns boxed futures so that the runtime can hold
//! `Arc<dyn StockCounter>` and friends, chosen at process start.

pub mod broadcast;
pub mod channel;
pub mod counter;
pub mod dead_letter;
pub mod ledger;
pub mod model;

pub use chrono::{DateTime, Utc};

pub use broadcast::{BroadcastChannel, BroadcastError, StockUpdateStream, STOCK_UPDATES_CHANNEL};
pub use channel::{ChannelError, Delivery, DeliveryStream, IntentSource, OrderChannel, Settlement};
pub use counter::{CounterError, StockCounter};
pub use dead_letter::{DeadLetter, DeadLetterError, DeadLetterSink};
pub use ledger::{CommitOutcome, CommittedOrder, DurableLedger, LedgerError};
pub use model::{BuyerId, Order, OrderId, OrderIntent, Product, ProductId, StockUpdateEvent};

/// Environment module - abstractions over ambient services.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The admission gate stamps every [`OrderIntent`](crate::OrderIntent) with
    /// the clock's current time.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
