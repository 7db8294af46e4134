//! Order validation
//!
//! [`OrderValidator`] is built once at process start and shared by reference.
//! Every rule is evaluated so a single response can report all violations.

use regex::Regex;

use crate::error::{FieldViolation, ValidationError};
use crate::order::{Delivery, Item, Order, Payment};

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$";
const PHONE_PATTERN: &str = r"^\+?[0-9]{7,15}$";
const CURRENCY_PATTERN: &str = r"^[A-Z]{3}$";

/// Upper bound for `items[].sale`, a percentage.
pub const MAX_SALE_PERCENT: i64 = 100;

// ============================================================================
// RULE HELPERS
// ============================================================================

/// Collects violations while walking an order.
#[derive(Debug, Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.push(FieldViolation::new(field, reason));
    }

    fn into_result(self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations: self.0 })
        }
    }
}

/// Trait for validating non-empty strings.
trait ValidateNonEmpty {
    fn validate_non_empty(&self, field: &str, out: &mut Violations);
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field: &str, out: &mut Violations) {
        if self.trim().is_empty() {
            out.push(field, "must not be empty");
        }
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field: &str, out: &mut Violations) {
        self.as_str().validate_non_empty(field, out)
    }
}

/// Trait for validating numeric bounds.
trait ValidateRange {
    fn validate_min(&self, field: &str, min: i64, out: &mut Violations);
    fn validate_range(&self, field: &str, min: i64, max: i64, out: &mut Violations);
}

impl ValidateRange for i64 {
    fn validate_min(&self, field: &str, min: i64, out: &mut Violations) {
        if *self < min {
            out.push(field, format!("must be at least {}", min));
        }
    }

    fn validate_range(&self, field: &str, min: i64, max: i64, out: &mut Violations) {
        if *self < min || *self > max {
            out.push(field, format!("must be between {} and {}", min, max));
        }
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

/// Structural and semantic checks applied before an order is accepted.
#[derive(Debug, Clone)]
pub struct OrderValidator {
    email: Regex,
    phone: Regex,
    currency: Regex,
}

impl OrderValidator {
    /// Compile the validator's patterns.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(EMAIL_PATTERN)?,
            phone: Regex::new(PHONE_PATTERN)?,
            currency: Regex::new(CURRENCY_PATTERN)?,
        })
    }

    /// Validate a complete order, reporting every violated field.
    pub fn validate(&self, order: &Order) -> Result<(), ValidationError> {
        let mut out = Violations::default();

        order.order_uid.validate_non_empty("order_uid", &mut out);
        order.track_number.validate_non_empty("track_number", &mut out);
        order.entry.validate_non_empty("entry", &mut out);
        order.locale.validate_non_empty("locale", &mut out);
        order.customer_id.validate_non_empty("customer_id", &mut out);
        order.delivery_service.validate_non_empty("delivery_service", &mut out);
        order.shardkey.validate_non_empty("shardkey", &mut out);
        order.oof_shard.validate_non_empty("oof_shard", &mut out);
        order.sm_id.validate_min("sm_id", 0, &mut out);

        self.validate_delivery(&order.delivery, &mut out);
        self.validate_payment(&order.payment, &mut out);

        if order.items.is_empty() {
            out.push("items", "must contain at least one item");
        }
        for (idx, item) in order.items.iter().enumerate() {
            validate_item(idx, item, &mut out);
        }

        out.into_result()
    }

    fn validate_delivery(&self, delivery: &Delivery, out: &mut Violations) {
        delivery.name.validate_non_empty("delivery.name", out);
        delivery.zip.validate_non_empty("delivery.zip", out);
        delivery.city.validate_non_empty("delivery.city", out);
        delivery.address.validate_non_empty("delivery.address", out);
        delivery.region.validate_non_empty("delivery.region", out);

        if delivery.phone.trim().is_empty() {
            out.push("delivery.phone", "must not be empty");
        } else if !self.phone.is_match(&delivery.phone) {
            out.push("delivery.phone", "must be 7-15 digits with an optional leading '+'");
        }

        if delivery.email.trim().is_empty() {
            out.push("delivery.email", "must not be empty");
        } else if !self.email.is_match(&delivery.email) {
            out.push("delivery.email", "must be a valid email address");
        }
    }

    fn validate_payment(&self, payment: &Payment, out: &mut Violations) {
        payment.transaction.validate_non_empty("payment.transaction", out);
        payment.provider.validate_non_empty("payment.provider", out);
        payment.bank.validate_non_empty("payment.bank", out);

        if !self.currency.is_match(&payment.currency) {
            out.push("payment.currency", "must be a three-letter upper-case currency code");
        }

        payment.amount.validate_min("payment.amount", 0, out);
        payment.payment_dt.validate_min("payment.payment_dt", 1, out);
        payment.delivery_cost.validate_min("payment.delivery_cost", 0, out);
        payment.goods_total.validate_min("payment.goods_total", 0, out);
        payment.custom_fee.validate_min("payment.custom_fee", 0, out);
    }
}

fn validate_item(idx: usize, item: &Item, out: &mut Violations) {
    let field = |name: &str| format!("items[{}].{}", idx, name);

    item.track_number.validate_non_empty(&field("track_number"), out);
    item.rid.validate_non_empty(&field("rid"), out);
    item.name.validate_non_empty(&field("name"), out);
    item.size.validate_non_empty(&field("size"), out);
    item.brand.validate_non_empty(&field("brand"), out);

    item.chrt_id.validate_min(&field("chrt_id"), 1, out);
    item.nm_id.validate_min(&field("nm_id"), 1, out);
    item.price.validate_min(&field("price"), 0, out);
    item.total_price.validate_min(&field("total_price"), 0, out);
    item.status.validate_min(&field("status"), 0, out);
    item.sale.validate_range(&field("sale"), 0, MAX_SALE_PERCENT, out);
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn order_with_sale(sale: i64) -> Order {
        let item = Item {
            chrt_id: 1,
            track_number: "TRACK".to_string(),
            price: 100,
            rid: "rid".to_string(),
            name: "item".to_string(),
            sale,
            size: "0".to_string(),
            total_price: 100,
            nm_id: 1,
            brand: "brand".to_string(),
            status: 0,
        };
        Order {
            order_uid: "prop".to_string(),
            track_number: "TRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "n".to_string(),
                phone: "+10000000".to_string(),
                zip: "1".to_string(),
                city: "c".to_string(),
                address: "a".to_string(),
                region: "r".to_string(),
                email: "a@b.io".to_string(),
            },
            payment: Payment {
                transaction: "prop".to_string(),
                request_id: String::new(),
                currency: "EUR".to_string(),
                provider: "p".to_string(),
                amount: 100,
                payment_dt: 1,
                bank: "b".to_string(),
                delivery_cost: 0,
                goods_total: 100,
                custom_fee: 0,
            },
            items: vec![item],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "c".to_string(),
            delivery_service: "d".to_string(),
            shardkey: "1".to_string(),
            sm_id: 0,
            date_created: chrono::Utc::now(),
            oof_shard: "1".to_string(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any sale percentage in [0, 100] is accepted.
        #[test]
        fn prop_sale_in_range_accepted(sale in 0i64..=MAX_SALE_PERCENT) {
            let v = OrderValidator::new().unwrap();
            prop_assert!(v.validate(&order_with_sale(sale)).is_ok());
        }

        /// Any sale percentage above 100 is reported on the item.
        #[test]
        fn prop_sale_above_range_rejected(sale in (MAX_SALE_PERCENT + 1)..i64::MAX) {
            let v = OrderValidator::new().unwrap();
            let err = v.validate(&order_with_sale(sale)).unwrap_err();
            prop_assert_eq!(err.fields(), vec!["items[0].sale"]);
        }

        /// Phones of 7-15 digits pass with or without a leading '+'.
        #[test]
        fn prop_phone_digits_accepted(digits in "[0-9]{7,15}", plus in any::<bool>()) {
            let v = OrderValidator::new().unwrap();
            let mut order = order_with_sale(0);
            order.delivery.phone = if plus { format!("+{}", digits) } else { digits };
            prop_assert!(v.validate(&order).is_ok());
        }
    }
}
