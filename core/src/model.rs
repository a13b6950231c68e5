//! Shared data model.
//!
//! | Type | Lives in | Mutated by |
//! |------|----------|------------|
//! | [`Product`] | durable ledger | fulfillment, inside a committed transaction |
//! | stock counter entry | fast-path counter (`product:<id>:stock`) | admission, atomically |
//! | [`OrderIntent`] | order channel only | never (ephemeral message) |
//! | [`Order`] | durable ledger | created once per committed fulfillment, immutable |
//! | [`StockUpdateEvent`] | broadcast channel only | never (fire-and-forget) |

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// The raw identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

integer_id!(
    /// Identifier of a product on sale.
    ProductId
);

integer_id!(
    /// Identifier of the buyer attempting a purchase.
    BuyerId
);

integer_id!(
    /// Identifier of a committed order row.
    OrderId
);

impl ProductId {
    /// Key of this product's entry in the fast-path counter store.
    ///
    /// ```
    /// use flash_sale_core::ProductId;
    ///
    /// assert_eq!(ProductId::new(1).stock_key(), "product:1:stock");
    /// ```
    #[must_use]
    pub fn stock_key(self) -> String {
        format!("product:{}:stock", self.0)
    }
}

/// A product row in the durable ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Authoritative remaining quantity (never negative)
    pub quantity: i64,
}

/// An admitted purchase travelling from admission to fulfillment.
///
/// Wire format on the order channel:
///
/// ```json
/// {"intent_id": "…", "buyer_id": 7, "product_id": 1, "timestamp": 1735689600}
/// ```
///
/// `intent_id` is the idempotency key for fulfillment. Messages produced without
/// one get a fresh id on decode, so they are still processed but cannot be
/// de-duplicated across redeliveries. `user_id` is read as `buyer_id`, and a
/// missing `timestamp` reads as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Idempotency key
    #[serde(default = "Uuid::new_v4")]
    pub intent_id: Uuid,
    /// Buyer who was admitted
    #[serde(alias = "user_id")]
    pub buyer_id: BuyerId,
    /// Product that was reserved
    pub product_id: ProductId,
    /// Creation time, Unix seconds (0 when the producer sent none)
    #[serde(default)]
    pub timestamp: i64,
}

impl OrderIntent {
    /// Create an intent stamped with `created_at`.
    #[must_use]
    pub fn new(buyer_id: BuyerId, product_id: ProductId, created_at: DateTime<Utc>) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            buyer_id,
            product_id,
            timestamp: created_at.timestamp(),
        }
    }

    /// Creation time as a UTC datetime.
    ///
    /// Falls back to the Unix epoch for out-of-range timestamps.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_default()
    }

    /// Encode as the JSON payload carried by the order channel.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON payload from the order channel.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload is not a valid intent.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// A committed order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier assigned by the ledger
    pub id: OrderId,
    /// Intent this order was committed from
    pub intent_id: Uuid,
    /// Buyer
    pub buyer_id: BuyerId,
    /// Product
    pub product_id: ProductId,
}

/// Authoritative stock level announced after a committed fulfillment.
///
/// Serialized exactly as viewers receive it:
///
/// ```
/// use flash_sale_core::{ProductId, StockUpdateEvent};
///
/// let event = StockUpdateEvent::new(ProductId::new(1), 4);
/// assert_eq!(event.to_json().unwrap(), r#"{"product_id":1,"stock":4}"#);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdateEvent {
    /// Product whose stock changed
    pub product_id: ProductId,
    /// Remaining authoritative quantity
    pub stock: i64,
}

impl StockUpdateEvent {
    /// Create a new stock update.
    #[must_use]
    pub const fn new(product_id: ProductId, stock: i64) -> Self {
        Self { product_id, stock }
    }

    /// Encode as the JSON text pushed to viewers.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a broadcast payload.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload is malformed.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
