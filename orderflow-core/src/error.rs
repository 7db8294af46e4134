//! Error types for orderflow operations

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path of the offending field, e.g. `delivery.email` or `items[0].price`.
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Caller-supplied order failed structural or semantic checks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Order validation failed: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Names of every violated field, in check order.
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A channel payload is not a valid order document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed order payload: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            reason: err.to_string(),
        }
    }
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Order {order_uid} not found")]
    NotFound { order_uid: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction conflict during {stage}: {reason}")]
    Conflict { stage: String, reason: String },

    #[error("Store rejected {stage}: {reason}")]
    Rejected { stage: String, reason: String },

    #[error("Stored order {order_uid} is inconsistent: {reason}")]
    Corrupt { order_uid: String, reason: String },
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Short machine-readable label, used in dead-letter envelopes and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Unavailable { .. } => "unavailable",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Rejected { .. } => "rejected",
            StoreError::Corrupt { .. } => "corrupt",
        }
    }
}

/// Fast cache errors. Never escalated past the orchestrators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Message channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Channel operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Channel closed")]
    Closed,
}

/// Failure of the submission path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Order could not be published: {0}")]
    ChannelUnavailable(#[source] ChannelError),

    #[error("Order could not be encoded: {reason}")]
    Encode { reason: String },
}

/// Failure of the read path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Order {order_uid} not found")]
    NotFound { order_uid: String },

    #[error("Order lookup failed: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for LookupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { order_uid } => LookupError::NotFound { order_uid },
            other => LookupError::Store(other),
        }
    }
}

/// Master error type for all orderflow errors.
#[derive(Debug, Clone, Error)]
pub enum OrderflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl OrderflowError {
    /// Stable label used in dead-letter envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderflowError::Validation(_) => "validation",
            OrderflowError::Decode(_) => "decode",
            OrderflowError::Store(err) => err.kind(),
            OrderflowError::Cache(_) => "cache",
            OrderflowError::Channel(_) => "channel",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type CacheResult<T> = Result<T, CacheError>;
pub type ChannelResult<T> = Result<T, ChannelError>;

// =============================================================================
// TESTS
// =============================================================================
