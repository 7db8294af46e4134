//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use orderflow_core::OrderValidator;
use orderflow_storage::{OrderCache, OrderChannel, OrderRepository};

use crate::services::{LookupService, SubmissionService};
use crate::telemetry::OrderflowMetrics;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub submission: Arc<SubmissionService>,
    pub lookup: Arc<LookupService>,
    /// Probed by the readiness check.
    pub repo: Arc<dyn OrderRepository>,
    /// Probed by the readiness check.
    pub cache: Arc<dyn OrderCache>,
    pub metrics: Arc<OrderflowMetrics>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire both orchestrators over the given backends.
    pub fn new(
        validator: OrderValidator,
        repo: Arc<dyn OrderRepository>,
        cache: Arc<dyn OrderCache>,
        channel: Arc<dyn OrderChannel>,
        metrics: Arc<OrderflowMetrics>,
    ) -> Self {
        let submission = Arc::new(SubmissionService::new(validator, channel, metrics.clone()));
        let lookup = Arc::new(LookupService::new(repo.clone(), cache.clone(), metrics.clone()));
        Self {
            submission,
            lookup,
            repo,
            cache,
            metrics,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<SubmissionService>, submission);
crate::impl_from_ref!(Arc<LookupService>, lookup);
crate::impl_from_ref!(Arc<OrderflowMetrics>, metrics);
