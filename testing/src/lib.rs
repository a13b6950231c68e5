//! # Flash Sale Testing
//!
//! In-memory collaborators for testing the flash sale pipeline without Redis,
//! Postgres or Redpanda.
//!
//! This crate provides:
//! - [`InMemoryStockCounter`], [`InMemoryLedger`], [`RecordingDeadLetters`]
//! - [`InMemoryOrderChannel`] (producer and consumer side, with ack/nack tracking)
//! - [`InMemoryBroadcastChannel`]
//! - [`FixedClock`] for deterministic intent timestamps
//!
//! Every collaborator has failure injection so tests can drive the error paths.
//!
//! ## Example
//!
//! ```ignore
//! use flash_sale_testing::{InMemoryOrderChannel, InMemoryStockCounter};
//! use flash_sale_runtime::AdmissionGate;
//!
//! #[tokio::test]
//! async fn test_admission() {
//!     let counter = InMemoryStockCounter::new().with_stock(ProductId::new(1), 1);
//!     let channel = InMemoryOrderChannel::new();
//!     let gate = AdmissionGate::new(Arc::new(counter.clone()), Arc::new(channel.clone()));
//!
//!     assert!(gate.reserve(ProductId::new(1), BuyerId::new(7)).await.is_admitted());
//!     assert_eq!(channel.enqueued().len(), 1);
//! }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only poisoned locks panic

use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;

pub mod channels;
pub mod stores;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flash_sale_testing::mocks::FixedClock;
    /// use flash_sale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use channels::{InMemoryBroadcastChannel, InMemoryOrderChannel};
pub use mocks::{FixedClock, test_clock};
pub use stores::{InMemoryLedger, InMemoryStockCounter, RecordingDeadLetters};
