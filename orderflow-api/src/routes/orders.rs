//! Order REST API Routes
//!
//! - `POST /api/v1/orders` validates and enqueues an order
//! - `GET /api/v1/orders/:order_uid` reads it back

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use orderflow_core::Order;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::services::{LookupService, SubmissionService};
use crate::state::AppState;

/// Body returned once an order was accepted for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub order_uid: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/orders
///
/// 202 means the order was published, not that it is stored yet.
pub async fn create_order(
    State(service): State<Arc<SubmissionService>>,
    payload: Result<Json<Order>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(order) = payload?;
    service.create_order(&order).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "OK".to_string(),
            order_uid: order.order_uid,
        }),
    ))
}

/// GET /api/v1/orders/:order_uid
pub async fn get_order(
    State(service): State<Arc<LookupService>>,
    Path(order_uid): Path<String>,
) -> ApiResult<Json<Order>> {
    if order_uid.trim().is_empty() {
        return Err(ApiError::invalid_input("order_uid must not be empty"));
    }
    let order = service.get_order(&order_uid).await?;
    Ok(Json(order))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/:order_uid", get(get_order))
}
