//! HTTP surface tests: the assembled router over in-memory backends.


use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use orderflow_api::routes::health::{HealthResponse, HealthStatus};
use orderflow_api::routes::orders::SubmitResponse;
use orderflow_api::{create_api_router, ApiError, ErrorCode, ServerConfig};
use orderflow_core::{Order, StoreError};
use orderflow_storage::RetryPolicy;
use orderflow_test_utils::fixtures::sample_order_json;
use orderflow_test_utils::sample_order;
use serde::de::DeserializeOwned;
use test_support::{Pipeline, TOPIC};
use tower::ServiceExt;

fn router(pipeline: &Pipeline) -> Router {
    create_api_router(pipeline.app_state(), &ServerConfig::default())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes()
        .to_vec();
    (status, body)
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).expect("Failed to parse JSON response")
}

fn post_order(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// SUBMISSION
// ============================================================================

#[tokio::test]
async fn post_valid_order_is_accepted() {
    let pipeline = Pipeline::new();
    let (status, body) = send(router(&pipeline), post_order(sample_order_json("http-1"))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let response: SubmitResponse = parse(&body);
    assert_eq!(response.status, "OK");
    assert_eq!(response.order_uid, "http-1");
    assert_eq!(pipeline.broker.messages(TOPIC).await.len(), 1);
}

#[tokio::test]
async fn post_invalid_order_lists_violations() {
    let pipeline = Pipeline::new();
    let mut order = sample_order("http-2");
    order.delivery.phone = "call me".to_string();
    order.payment.amount = -1;

    let (status, body) = send(
        router(&pipeline),
        post_order(serde_json::to_vec(&order).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ApiError = parse(&body);
    assert_eq!(error.code, ErrorCode::ValidationFailed);
    let details = error.details.expect("violations in details");
    let fields: Vec<&str> = details["violations"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["field"].as_str())
        .collect();
    assert!(fields.contains(&"delivery.phone"));
    assert!(fields.contains(&"payment.amount"));
    assert!(pipeline.broker.messages(TOPIC).await.is_empty());
}

#[tokio::test]
async fn post_malformed_json_is_bad_request() {
    let pipeline = Pipeline::new();
    let (status, body) = send(router(&pipeline), post_order(b"{\"order_uid\":".to_vec())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ApiError = parse(&body);
    assert_eq!(error.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn post_with_channel_down_is_unavailable() {
    let pipeline = Pipeline::new();
    pipeline.broker.set_unavailable(true).await;

    let (status, body) = send(router(&pipeline), post_order(sample_order_json("http-3"))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let error: ApiError = parse(&body);
    assert_eq!(error.code, ErrorCode::ServiceUnavailable);
}

// ============================================================================
// LOOKUP
// ============================================================================

#[tokio::test]
async fn get_returns_ingested_order() {
    let pipeline = Pipeline::new();
    let (status, _) = send(router(&pipeline), post_order(sample_order_json("http-4"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    pipeline.ingest_until_acked(RetryPolicy::default(), 1).await;

    let (status, body) = send(router(&pipeline), get("/api/v1/orders/http-4")).await;
    assert_eq!(status, StatusCode::OK);
    let order: Order = parse(&body);
    assert_eq!(order, sample_order("http-4"));
}

#[tokio::test]
async fn get_unknown_order_is_not_found() {
    let pipeline = Pipeline::new();
    let (status, body) = send(router(&pipeline), get("/api/v1/orders/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ApiError = parse(&body);
    assert_eq!(error.code, ErrorCode::OrderNotFound);
}

#[tokio::test]
async fn get_with_store_failure_is_server_error() {
    let pipeline = Pipeline::new();
    pipeline
        .repo
        .fail_next_get(StoreError::Unavailable {
            reason: "pool exhausted".into(),
        })
        .await;

    let (status, body) = send(router(&pipeline), get("/api/v1/orders/http-5")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: ApiError = parse(&body);
    assert!(!error.message.contains("pool exhausted"));
}

// ============================================================================
// HEALTH AND METRICS
// ============================================================================

#[tokio::test]
async fn health_endpoints_respond() {
    let pipeline = Pipeline::new();

    let (status, body) = send(router(&pipeline), get("/health/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"pong");

    let (status, body) = send(router(&pipeline), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = parse(&body);
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn readiness_reflects_backend_state() {
    let pipeline = Pipeline::new();

    pipeline.cache.set_unavailable(true).await;
    let (status, body) = send(router(&pipeline), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse::<HealthResponse>(&body).status, HealthStatus::Degraded);

    pipeline
        .repo
        .set_ping_failure(Some(StoreError::Unavailable {
            reason: "connection refused".into(),
        }))
        .await;
    let (status, body) = send(router(&pipeline), get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: HealthResponse = parse(&body);
    assert_eq!(health.status, HealthStatus::Unhealthy);
    let details = health.details.unwrap();
    assert!(details.database.error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn metrics_use_route_templates() {
    let pipeline = Pipeline::new();
    send(router(&pipeline), get("/api/v1/orders/abc")).await;
    send(router(&pipeline), get("/api/v1/orders/def")).await;

    let (status, body) = send(router(&pipeline), get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains(
        r#"orderflow_http_requests_total{method="GET",path="/api/v1/orders/:order_uid",status="404"} 2"#
    ));
    assert!(!text.contains("/api/v1/orders/abc"));
}
