//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, FakeExecutor};
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: GET /health reports a reachable ComfyUI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_connected_executor() {
    let executor = FakeExecutor::start(json!({}), &[]).await;
    let app = common::build_test_app(&executor.url);
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["comfyui_status"], "connected");
    assert_eq!(json["comfyui_url"], executor.url.as_str());
}

// ---------------------------------------------------------------------------
// Test: GET /health stays 200 when ComfyUI is down
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_disconnected_executor() {
    let app = common::build_test_app(&common::unreachable_url());
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["comfyui_status"], "disconnected");
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = common::build_test_app(&common::unreachable_url());
    let response = get(app, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let app = common::build_test_app(&common::unreachable_url());
    let response = get(app, "/api/v1/workflows").await;

    let request_id = response.headers().get("x-request-id");
    assert!(
        request_id.is_some(),
        "Response must contain an x-request-id header"
    );
    let id_str = request_id.unwrap().to_str().unwrap();
    assert_eq!(id_str.len(), 36, "x-request-id should be a UUID: {id_str}");
}

// ---------------------------------------------------------------------------
// Test: GET /api/v1/workflows lists all three workflows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workflows_are_listed_with_endpoints() {
    let app = common::build_test_app(&common::unreachable_url());
    let response = get(app, "/api/v1/workflows").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let workflows = json["data"].as_array().unwrap();
    assert_eq!(workflows.len(), 3);

    let endpoints: Vec<&str> = workflows
        .iter()
        .map(|w| w["endpoint"].as_str().unwrap())
        .collect();
    assert_eq!(
        endpoints,
        vec!["/api/v1/generate-image", "/api/v1/edit-image", "/api/v1/image-to-video"]
    );
    assert!(workflows.iter().all(|w| w["available"] == true));
    assert!(workflows[0]["parameters"]["width"].is_string());
}
