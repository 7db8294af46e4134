//! ORDERFLOW API - Order Submission, Ingestion and Lookup Service
//!
//! HTTP endpoints (Axum) accept orders and publish them to Kafka; a
//! background worker consumes them into PostgreSQL and keeps a Redis cache
//! warm for the lookup endpoint.

pub mod cache;
pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod macros;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use cache::RedisCache;
pub use channel::{create_producer, KafkaPublisher, KafkaSubscription};
pub use config::{AppConfig, BackoffKind, CacheConfig, IngestConfig, KafkaConfig, ServerConfig};
pub use db::{DbConfig, PgOrderRepository};
pub use error::{ApiError, ApiResult, ErrorCode, StartupError};
pub use routes::create_api_router;
pub use services::{
    DeadLetterEnvelope, IngestOutcome, IngestSummary, IngestionWorker, LookupService,
    SubmissionService,
};
pub use state::AppState;
