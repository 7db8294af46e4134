//! Capability traits for the durable store, the fast cache and the message
//! channel.
//!
//! Orchestrators hold these behind `Arc<dyn ...>` so production backends and
//! the in-memory backends in [`crate::memory`] are interchangeable.

use async_trait::async_trait;
use orderflow_core::{CacheResult, ChannelResult, Order, StoreResult};
use std::time::Duration;

/// Result of an insert-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// All four tables were written in this call.
    Inserted,
    /// The order row already existed; nothing new was written for it.
    AlreadyPresent,
}

/// Durable, transactional order storage.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Write delivery, payment, order and items atomically.
    ///
    /// Each row insert is conflict-safe. Any failure leaves no partial
    /// aggregate behind.
    async fn insert(&self, order: &Order) -> StoreResult<InsertOutcome>;

    /// Read the full aggregate, items in insertion order.
    ///
    /// Returns `StoreError::NotFound` when no order row exists.
    async fn get_by_id(&self, order_uid: &str) -> StoreResult<Order>;

    /// Cheap liveness check used by readiness.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Best-effort key/value cache with per-entry TTL.
///
/// Values are opaque bytes; decoding (and dealing with corrupt entries) is the
/// caller's job.
#[async_trait]
pub trait OrderCache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Outbound side of the message channel, bound to one topic.
#[async_trait]
pub trait OrderChannel: Send + Sync {
    /// Publish one keyed message. Returns only once the broker acknowledged it.
    async fn publish(&self, key: &str, payload: &[u8]) -> ChannelResult<()>;
}

/// A message received from the channel, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl InboundMessage {
    /// Message key, or an empty string when the producer sent none.
    pub fn key_str(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }
}

/// Inbound side of the message channel.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message. Callers race this against cancellation.
    async fn fetch(&self) -> ChannelResult<InboundMessage>;

    /// Mark a message as fully handled so it is not redelivered.
    async fn ack(&self, message: &InboundMessage) -> ChannelResult<()>;
}
