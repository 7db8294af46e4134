//! ORDERFLOW Core - Order Types
//!
//! The order aggregate, its validator and the error taxonomy shared by every
//! other crate in the workspace. No I/O lives here.

use std::time::Duration;

pub mod error;
pub mod order;
pub mod validator;

pub use error::{
    CacheError, CacheResult, ChannelError, ChannelResult, DecodeError, FieldViolation,
    LookupError, OrderflowError, StoreError, StoreResult, SubmitError, ValidationError,
};
pub use order::{
    stored_precision, Delivery, Item, Order, Payment, Timestamp, TIMESTAMP_SUBSEC_DIGITS,
};
pub use validator::{OrderValidator, MAX_SALE_PERCENT};

/// Standard lifetime of a cached order.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
