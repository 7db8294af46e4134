//! Order aggregate
//!
//! The canonical wire shape used on the message channel, in the cache and
//! over HTTP. Field names are the column names of the durable store.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Fractional-second digits kept for order timestamps (microseconds, the
/// resolution of a `TIMESTAMPTZ` column).
pub const TIMESTAMP_SUBSEC_DIGITS: u16 = 6;

/// Cut a timestamp to [`TIMESTAMP_SUBSEC_DIGITS`].
pub fn stored_precision(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(TIMESTAMP_SUBSEC_DIGITS)
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// An order with its delivery, payment and items.
///
/// `order_uid` is the identity of the whole aggregate: it keys the durable
/// rows, the cache entry and the channel partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i64,
    #[serde(with = "micros")]
    pub date_created: Timestamp,
    pub oof_shard: String,
}

/// Delivery details. Stored keyed by the owning order's `order_uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details. Stored keyed by `transaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A single line item. Items have no identity of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i64,
}

// ============================================================================
// CANONICAL ENCODING
// ============================================================================

impl Order {
    /// Encode to the canonical JSON representation.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the canonical JSON representation.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::from)
    }

    /// Cache and partition key for this order.
    pub fn key(&self) -> &str {
        &self.order_uid
    }

    /// This order as it reads back from the store and the cache.
    pub fn with_stored_precision(mut self) -> Self {
        self.date_created = stored_precision(self.date_created);
        self
    }
}

mod micros {
    use super::{stored_precision, Timestamp};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        stored_precision(*ts).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        Timestamp::deserialize(deserializer).map(stored_precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Order {
        Order {
            order_uid: "b563feb7b2b84b6test".to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                phone: "+9720000000".to_string(),
                zip: "2639809".to_string(),
                city: "Kiryat Mozkin".to_string(),
                address: "Ploshad Mira 15".to_string(),
                region: "Kraiot".to_string(),
                email: "test@gmail.com".to_string(),
            },
            payment: Payment {
                transaction: "b563feb7b2b84b6test".to_string(),
                request_id: String::new(),
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1817,
                payment_dt: 1637907727,
                bank: "alpha".to_string(),
                delivery_cost: 1500,
                goods_total: 317,
                custom_fee: 0,
            },
            items: vec![Item {
                chrt_id: 9934930,
                track_number: "WBILMTESTTRACK".to_string(),
                price: 453,
                rid: "ab4219087a764ae0btest".to_string(),
                name: "Mascaras".to_string(),
                sale: 30,
                size: "0".to_string(),
                total_price: 317,
                nm_id: 2389212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
            oof_shard: "1".to_string(),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["order_uid"], "b563feb7b2b84b6test");
        assert_eq!(value["payment"]["transaction"], "b563feb7b2b84b6test");
        assert_eq!(value["delivery"]["email"], "test@gmail.com");
        assert!(value["items"].is_array());
        assert_eq!(value["items"][0]["chrt_id"], 9934930);
        assert_eq!(value["date_created"], "2021-11-26T06:22:19Z");
    }

    #[test]
    fn test_decode_canonical_document() {
        let order = sample();
        let bytes = order.to_json_bytes().unwrap();
        let decoded = Order::from_json_bytes(&bytes).unwrap();
        assert_eq!(decoded, order);
        assert_eq!(decoded.key(), "b563feb7b2b84b6test");
    }

    #[test]
    fn test_sub_microsecond_timestamp_is_truncated() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["date_created"] = "2021-11-26T06:22:19.123456789Z".into();
        let decoded = Order::from_json_bytes(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(
            decoded.date_created,
            DateTime::from_timestamp(1637907739, 123_456_000).unwrap()
        );

        let mut order = sample();
        order.date_created = DateTime::from_timestamp(1637907739, 123_456_789).unwrap();
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["date_created"], "2021-11-26T06:22:19.123456Z");
        let decoded = Order::from_json_bytes(&order.to_json_bytes().unwrap()).unwrap();
        assert_eq!(decoded, order.with_stored_precision());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Order::from_json_bytes(b"not-json").unwrap_err();
        assert!(err.to_string().contains("expected"));
    }

    #[test]
    fn test_decode_rejects_missing_nested_object() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("payment");
        let bytes = serde_json::to_vec(&value).unwrap();
        let err = Order::from_json_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("payment"));
    }
}
