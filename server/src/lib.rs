//! Process wiring for the flash sale pipeline.
//!
//! Two binaries share this crate:
//!
//! - `api`: HTTP admission endpoint, live-update websocket and the stock relay
//! - `worker`: fulfillment consumers committing admitted orders to the ledger
//!
//! Both load [`Config`] from the environment, connect through
//! [`Resources::connect`], expose Prometheus metrics on their own listener and
//! stop on Ctrl+C or SIGTERM.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod config;
pub mod telemetry;

pub use bootstrap::{BootstrapError, Resources};
pub use config::{Config, ConfigError};
