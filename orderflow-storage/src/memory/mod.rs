//! In-memory backends for every capability trait.
//!
//! Not intended for production use. They make the pipeline testable without
//! Postgres, Redis or Kafka, and expose switches to inject failures.

pub mod cache;
pub mod channel;
pub mod repository;

pub use cache::InMemoryCache;
pub use channel::{InMemoryBroker, InMemoryPublisher, InMemorySubscription};
pub use repository::{InMemoryOrderRepository, InsertStage};
