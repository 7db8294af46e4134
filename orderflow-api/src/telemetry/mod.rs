//! ORDERFLOW Telemetry - Observability Infrastructure
//!
//! Structured logging through tracing-subscriber and Prometheus metrics
//! owned by the application state.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, CacheLookup, OrderflowMetrics};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, LogFormat};
