//! REST API Routes
//!
//! Router assembly for the order endpoints, health checks and the metrics
//! scrape endpoint.

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub mod health;
pub mod orders;

/// Build the complete application router.
///
/// Layers, outermost first:
/// 1. HTTP tracing (tower-http)
/// 2. Metrics and request span
/// 3. Request timeout
pub fn create_api_router(state: AppState, server: &ServerConfig) -> Router {
    let health = health::create_router(state.repo.clone(), state.cache.clone(), state.start_time);

    Router::new()
        .nest("/api/v1/orders", orders::create_router())
        .nest("/health", health)
        .route("/metrics", get(metrics_handler))
        .layer(TimeoutLayer::new(server.request_timeout))
        .layer(from_fn_with_state(state.metrics.clone(), observability_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
