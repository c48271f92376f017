//! Router-level tests for the mock workflow API.
//!
//! Requests are dispatched through the full axum router with `oneshot`, so
//! path matching, extractors and status mapping are all exercised.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use flowsync_core::config::MockConfig;
use flowsync_mock::{build_router, MockBackend};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> axum::Router {
    let backend = MockBackend::seeded(&MockConfig::default());
    build_router(Arc::new(backend))
}

async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

// ===========================================================================
// TEST 1: GET /health
// ===========================================================================
#[tokio::test]
async fn test_health_endpoint() {
    let (status, body) = send(app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ===========================================================================
// TEST 2: GET /api/workflows/:id resolves the path parameter
// ===========================================================================
#[tokio::test]
async fn test_get_workflow_by_id() {
    let (status, body) = send(app(), "GET", "/api/workflows/wf-seed-done", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "wf-seed-done");
    assert_eq!(body["status"], "completed");
}

// ===========================================================================
// TEST 3: POST /api/workflows with a JSON body
// ===========================================================================
#[tokio::test]
async fn test_create_workflow_roundtrip() {
    let req = json!({
        "name": "Index docs",
        "requirement": "Rebuild the search index",
        "type": "maintenance",
        "priority": "high",
        "tags": ["search"]
    });
    let (status, body) = send(app(), "POST", "/api/workflows", Some(req)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["type"], "maintenance");
    assert!(body["id"].as_str().unwrap().starts_with("wf-"));
}

// ===========================================================================
// TEST 4: malformed create body is rejected by the extractor
// ===========================================================================
#[tokio::test]
async fn test_create_workflow_missing_fields() {
    let (status, _) = send(app(), "POST", "/api/workflows", Some(json!({ "name": "x" }))).await;
    assert!(status.is_client_error(), "got {}", status);
}

// ===========================================================================
// TEST 5: POST /api/workflows/:id/cancel on a finished workflow
// ===========================================================================
#[tokio::test]
async fn test_cancel_finished_workflow_conflict() {
    let (status, body) = send(app(), "POST", "/api/workflows/wf-seed-done/cancel", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("completed"));
}

// ===========================================================================
// TEST 6: DELETE returns an empty 204
// ===========================================================================
#[tokio::test]
async fn test_delete_workflow_no_content() {
    let (status, body) = send(app(), "DELETE", "/api/workflows/wf-seed-running", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

// ===========================================================================
// TEST 7: agents
// ===========================================================================
#[tokio::test]
async fn test_agent_endpoints() {
    let (status, body) = send(app(), "GET", "/api/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, _) = send(app(), "GET", "/api/agents/agent-unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
