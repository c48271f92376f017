//! Mock workflow REST API
//!
//! Serves the same paths as the real backend so the client can be developed
//! and tested offline. Each endpoint is a thin axum handler over an inner
//! function that returns `(StatusCode, Value)`; the inner functions are
//! tested directly.
//!
//! Endpoints:
//! - GET    /health
//! - GET    /api/workflows
//! - POST   /api/workflows
//! - GET    /api/workflows/:id
//! - DELETE /api/workflows/:id
//! - POST   /api/workflows/:id/cancel
//! - GET    /api/agents
//! - GET    /api/agents/:id
//! - GET    /ws/workflows/:id  (WebSocket push: one frame per status change)

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flowsync_core::config::MockConfig;
use flowsync_core::WorkflowCreateRequest;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::backend::{MockBackend, MockError, WorkflowChange};

/// Build the Axum router with all endpoints
pub fn build_router(backend: Arc<MockBackend>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/workflows",
            get(list_workflows_handler).post(create_workflow_handler),
        )
        .route(
            "/api/workflows/:id",
            get(get_workflow_handler).delete(delete_workflow_handler),
        )
        .route("/api/workflows/:id/cancel", post(cancel_workflow_handler))
        .route("/api/agents", get(list_agents_handler))
        .route("/api/agents/:id", get(get_agent_handler))
        .route("/ws/workflows/:id", get(push_handler))
        .with_state(backend)
}

/// Bind the configured address and serve until the broadcast shutdown fires.
pub async fn start_mock_server(
    backend: Arc<MockBackend>,
    config: &MockConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Mock workflow API listening on http://{}", addr);

    serve(listener, backend, async move {
        let _ = shutdown.recv().await;
    })
    .await
}

/// Serve on an already bound listener. Tests bind port 0 and use this.
pub async fn serve(
    listener: TcpListener,
    backend: Arc<MockBackend>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, build_router(backend))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Mock server shutting down...");
        })
        .await?;
    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub fn error_to_http(err: MockError) -> (StatusCode, Value) {
    let (status, message) = match err {
        MockError::NotFound(m) => (StatusCode::NOT_FOUND, m),
        MockError::Conflict(m) => (StatusCode::CONFLICT, m),
        MockError::Unavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "injected fault".to_string(),
        ),
    };
    (status, json!({ "detail": message }))
}

fn ok_json<T: serde::Serialize>(status: StatusCode, value: &T) -> (StatusCode, Value) {
    match serde_json::to_value(value) {
        Ok(v) => (status, v),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": e.to_string() }),
        ),
    }
}

pub async fn list_workflows_inner(backend: &MockBackend) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    ok_json(StatusCode::OK, &backend.list_workflows().await)
}

pub async fn get_workflow_inner(backend: &MockBackend, id: &str) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    match backend.get_workflow(id).await {
        Ok(wf) => ok_json(StatusCode::OK, &wf),
        Err(e) => error_to_http(e),
    }
}

pub async fn create_workflow_inner(
    backend: &MockBackend,
    request: WorkflowCreateRequest,
) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    if request.name.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "detail": "name must not be empty" }),
        );
    }
    let created = backend.create_workflow(request).await;
    ok_json(StatusCode::CREATED, &created)
}

pub async fn cancel_workflow_inner(backend: &MockBackend, id: &str) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    match backend.cancel_workflow(id).await {
        Ok(wf) => ok_json(StatusCode::OK, &wf),
        Err(e) => error_to_http(e),
    }
}

/// `NO_CONTENT` with a null body on success.
pub async fn delete_workflow_inner(backend: &MockBackend, id: &str) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    match backend.delete_workflow(id).await {
        Ok(()) => (StatusCode::NO_CONTENT, Value::Null),
        Err(e) => error_to_http(e),
    }
}

pub fn list_agents_inner(backend: &MockBackend) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    ok_json(StatusCode::OK, &backend.list_agents())
}

pub fn get_agent_inner(backend: &MockBackend, id: &str) -> (StatusCode, Value) {
    if let Err(e) = backend.check_fault() {
        return error_to_http(e);
    }
    match backend.get_agent(id) {
        Ok(agent) => ok_json(StatusCode::OK, &agent),
        Err(e) => error_to_http(e),
    }
}

/// Push frame for a change, in the backend's `status_update` shape.
pub fn push_frame(change: &WorkflowChange) -> Value {
    let data = match &change.record {
        Some(wf) => json!({
            "status": wf.status,
            "current_step": wf.current_step,
            "updated_at": wf.updated_at,
        }),
        None => json!({ "deleted": true }),
    };
    json!({
        "event_type": "status_update",
        "workflow_id": change.workflow_id,
        "data": data,
    })
}

// ============================================================================
// Axum handlers
// ============================================================================

fn respond((status, body): (StatusCode, Value)) -> Response {
    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    (status, Json(body)).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_workflows_handler(State(backend): State<Arc<MockBackend>>) -> Response {
    respond(list_workflows_inner(&backend).await)
}

async fn create_workflow_handler(
    State(backend): State<Arc<MockBackend>>,
    Json(request): Json<WorkflowCreateRequest>,
) -> Response {
    respond(create_workflow_inner(&backend, request).await)
}

async fn get_workflow_handler(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Response {
    respond(get_workflow_inner(&backend, &id).await)
}

async fn delete_workflow_handler(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Response {
    respond(delete_workflow_inner(&backend, &id).await)
}

async fn cancel_workflow_handler(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Response {
    respond(cancel_workflow_inner(&backend, &id).await)
}

async fn list_agents_handler(State(backend): State<Arc<MockBackend>>) -> Response {
    respond(list_agents_inner(&backend))
}

async fn get_agent_handler(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Response {
    respond(get_agent_inner(&backend, &id))
}

async fn push_handler(
    ws: WebSocketUpgrade,
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Response {
    // Subscribe before the upgrade so no change slips past the handshake.
    let changes = backend.subscribe_changes();
    ws.on_upgrade(move |socket| push_socket(socket, changes, id))
}

async fn push_socket(socket: WebSocket, mut changes: broadcast::Receiver<WorkflowChange>, id: String) {
    tracing::info!(workflow_id = %id, "Push client connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        let frame = tokio::select! {
            change = changes.recv() => match change {
                Ok(change) if change.workflow_id == id => push_frame(&change),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(workflow_id = %id, missed, "Push client lagged");
                    json!({ "event_type": "status_update", "workflow_id": id })
                }
                Err(RecvError::Closed) => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        if sender.send(Message::Text(frame.to_string())).await.is_err() {
            break;
        }
    }

    tracing::info!(workflow_id = %id, "Push client disconnected");
}

// ============================================================================
// TESTS
// ============================================================================
