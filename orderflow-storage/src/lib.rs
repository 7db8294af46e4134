//! ORDERFLOW Storage - Capability Traits and In-Memory Backends
//!
//! Defines the seams between the orchestrators and infrastructure. The
//! Postgres, Redis and Kafka implementations live in orderflow-api.

pub mod memory;
pub mod retry;
pub mod traits;

pub use memory::{
    InMemoryBroker, InMemoryCache, InMemoryOrderRepository, InMemoryPublisher,
    InMemorySubscription, InsertStage,
};
pub use retry::{Backoff, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use traits::{InboundMessage, InsertOutcome, MessageSource, OrderCache, OrderChannel, OrderRepository};
