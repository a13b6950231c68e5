//! `Redis` adapters for the flash sale pipeline.
//!
//! - [`RedisStockCounter`]: the fast-path [`StockCounter`](flash_sale_core::StockCounter),
//!   one integer key per product
//! - [`RedisBroadcastChannel`]: the [`BroadcastChannel`](flash_sale_core::BroadcastChannel)
//!   over `PUBLISH`/`SUBSCRIBE`
//!
//! Both connect through a [`ConnectionManager`](redis::aio::ConnectionManager),
//! which reconnects on its own after a dropped connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod counter;

pub use broadcast::RedisBroadcastChannel;
pub use counter::RedisStockCounter;
