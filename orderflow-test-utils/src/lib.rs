//! ORDERFLOW Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Fixture orders matching the canonical sample document
//! - Proptest generators for valid orders
//! - Assertions for validation failures

pub use orderflow_core::{
    Delivery, Item, Order, OrderValidator, Payment, Timestamp, ValidationError,
};

pub use fixtures::{sample_order, sample_order_with_items};

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built orders for common testing scenarios.

    use super::*;
    use chrono::{DateTime, Utc};

    /// Creation time of every fixture order, with a microsecond fraction.
    pub fn fixture_timestamp() -> Timestamp {
        DateTime::from_timestamp(1637907739, 481_273_000).unwrap_or_else(Utc::now)
    }

    pub fn sample_delivery() -> Delivery {
        Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        }
    }

    pub fn sample_payment(transaction: &str) -> Payment {
        Payment {
            transaction: transaction.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1637907727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        }
    }

    /// The `n`-th item of a fixture order. Distinct `chrt_id` per position.
    pub fn sample_item(n: usize) -> Item {
        Item {
            chrt_id: 9934930 + n as i64,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: format!("ab4219087a764ae0btest{}", n),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2389212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }
    }

    /// A valid order with one item. The payment transaction equals `order_uid`.
    pub fn sample_order(order_uid: &str) -> Order {
        sample_order_with_items(order_uid, 1)
    }

    /// A valid order with `items` line items (at least one).
    pub fn sample_order_with_items(order_uid: &str, items: usize) -> Order {
        Order {
            order_uid: order_uid.to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: sample_delivery(),
            payment: sample_payment(order_uid),
            items: (0..items.max(1)).map(sample_item).collect(),
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: fixture_timestamp(),
            oof_shard: "1".to_string(),
        }
    }

    /// Canonical JSON bytes of [`sample_order`].
    pub fn sample_order_json(order_uid: &str) -> Vec<u8> {
        serde_json::to_vec(&sample_order(order_uid)).unwrap_or_default()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies producing orders that pass [`OrderValidator`].

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    /// Generate a Timestamp with nanosecond precision (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64, 0u32..1_000_000_000u32).prop_map(|(secs, nanos)| {
            DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_order_uid() -> impl Strategy<Value = String> {
        "[a-z0-9]{8,24}"
    }

    pub fn arb_delivery() -> impl Strategy<Value = Delivery> {
        (
            "[A-Za-z]{1,12} [A-Za-z]{1,12}",
            "\\+?[0-9]{7,15}",
            "[0-9]{5,7}",
            "[A-Za-z ]{1,20}",
            "[A-Za-z0-9 ]{1,40}",
            "[A-Za-z]{1,20}",
            "[a-z0-9]{1,12}@[a-z]{2,10}\\.[a-z]{2,4}",
        )
            .prop_map(|(name, phone, zip, city, address, region, email)| Delivery {
                name,
                phone,
                zip,
                city: format!("c{}", city),
                address: format!("a{}", address),
                region,
                email,
            })
    }

    pub fn arb_payment(transaction: String) -> impl Strategy<Value = Payment> {
        (
            "[A-Z]{3}",
            "[a-z]{2,10}",
            0i64..1_000_000,
            1i64..2_000_000_000,
            "[a-z]{2,10}",
            0i64..10_000,
            0i64..1_000_000,
            0i64..1_000,
        )
            .prop_map(
                move |(
                    currency,
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                )| Payment {
                    transaction: transaction.clone(),
                    request_id: String::new(),
                    currency,
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                },
            )
    }

    pub fn arb_item() -> impl Strategy<Value = Item> {
        (
            1i64..100_000_000,
            "[A-Z]{4,16}",
            0i64..1_000_000,
            "[a-z0-9]{4,24}",
            "[A-Za-z]{1,20}",
            0i64..=100,
            "[0-9A-Z]{1,3}",
            0i64..1_000_000,
            1i64..100_000_000,
            "[A-Za-z]{1,20}",
            0i64..1_000,
        )
            .prop_map(
                |(chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status)| {
                    Item {
                        chrt_id,
                        track_number,
                        price,
                        rid,
                        name,
                        sale,
                        size,
                        total_price,
                        nm_id,
                        brand,
                        status,
                    }
                },
            )
    }

    /// Generate a complete order that passes validation.
    pub fn arb_valid_order() -> impl Strategy<Value = Order> {
        arb_order_uid().prop_flat_map(|order_uid| {
            (
                Just(order_uid.clone()),
                "[A-Z]{4,16}",
                arb_delivery(),
                arb_payment(order_uid),
                prop::collection::vec(arb_item(), 1..6),
                "[a-z]{2}",
                "[a-z0-9]{1,12}",
                "[a-z]{2,10}",
                0i64..1_000,
                arb_timestamp(),
            )
                .prop_map(
                    |(
                        order_uid,
                        track_number,
                        delivery,
                        payment,
                        items,
                        locale,
                        customer_id,
                        delivery_service,
                        sm_id,
                        date_created,
                    )| Order {
                        order_uid,
                        track_number,
                        entry: "WBIL".to_string(),
                        delivery,
                        payment,
                        items,
                        locale,
                        internal_signature: String::new(),
                        customer_id,
                        delivery_service,
                        shardkey: "9".to_string(),
                        sm_id,
                        date_created,
                        oof_shard: "1".to_string(),
                    },
                )
        })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for validation outcomes.

    use super::*;

    /// Assert that validation failed and reported exactly `fields`.
    #[track_caller]
    pub fn assert_violations(result: &Result<(), ValidationError>, fields: &[&str]) {
        match result {
            Err(err) => assert_eq!(err.fields(), fields, "unexpected violations: {}", err),
            Ok(()) => panic!("Expected validation failure on {:?}, got Ok", fields),
        }
    }
}
