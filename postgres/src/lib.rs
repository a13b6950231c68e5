//! `PostgreSQL` adapters for the flash sale pipeline.
//!
//! - [`PostgresLedger`]: the authoritative [`DurableLedger`](flash_sale_core::DurableLedger)
//!   over the `products` and `orders` tables
//! - [`DeadLetterQueue`]: the [`DeadLetterSink`](flash_sale_core::DeadLetterSink)
//!   over `failed_intents`, with the review workflow around it
//!
//! Both share one schema, applied with [`PostgresLedger::migrate`].
//!
//! # Example
//!
//! ```no_run
//! use flash_sale_postgres::{DeadLetterQueue, PostgresLedger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = PostgresLedger::connect("postgres://localhost/flashsale_db", 10).await?;
//! ledger.migrate().await?;
//!
//! let dead_letters = DeadLetterQueue::new(ledger.pool().clone());
//! println!("{} intents awaiting review", dead_letters.count_pending().await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter_queue;
pub mod ledger;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedIntent};
pub use ledger::PostgresLedger;
