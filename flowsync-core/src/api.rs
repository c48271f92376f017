//! Resource clients: domain operations mapped onto fixed API paths.
//!
//! No retry logic lives here; every call goes through [`ApiClient::request`].

use async_trait::async_trait;
use reqwest::Method;

use crate::error::ApiError;
use crate::models::{AgentRecord, WorkflowCreateRequest, WorkflowRecord};
use crate::transport::{ApiClient, DEFAULT_RETRYABLE_STATUSES};

/// Abstraction over the workflow backend.
///
/// All reads are safe to call concurrently. `cancel_workflow` changes server
/// state and should be driven through `SyncStore::cancel_workflow` so the
/// result is reconciled by a fresh fetch.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, ApiError>;

    async fn fetch_workflow(&self, id: &str) -> Result<WorkflowRecord, ApiError>;

    async fn create_workflow(
        &self,
        request: &WorkflowCreateRequest,
    ) -> Result<WorkflowRecord, ApiError>;

    /// Ask the server to cancel. The returned record is the server's view at
    /// acknowledgement time and must not be treated as the settled state.
    async fn cancel_workflow(&self, id: &str) -> Result<WorkflowRecord, ApiError>;

    async fn delete_workflow(&self, id: &str) -> Result<(), ApiError>;

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ApiError>;

    async fn fetch_agent(&self, id: &str) -> Result<AgentRecord, ApiError>;

    /// Statuses this backend's transport treats as transient. Any other HTTP
    /// status is a permanent answer and ends polling of that resource.
    fn retryable_statuses(&self) -> &[u16] {
        &DEFAULT_RETRYABLE_STATUSES
    }
}

pub fn workflows_path() -> &'static str {
    "/api/workflows"
}

pub fn workflow_path(id: &str) -> String {
    format!("/api/workflows/{}", id)
}

pub fn cancel_path(id: &str) -> String {
    format!("/api/workflows/{}/cancel", id)
}

pub fn agents_path() -> &'static str {
    "/api/agents"
}

pub fn agent_path(id: &str) -> String {
    format!("/api/agents/{}", id)
}

#[async_trait]
impl WorkflowApi for ApiClient {
    async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, ApiError> {
        self.request(Method::GET, workflows_path(), None::<&()>).await
    }

    async fn fetch_workflow(&self, id: &str) -> Result<WorkflowRecord, ApiError> {
        self.request(Method::GET, &workflow_path(id), None::<&()>).await
    }

    async fn create_workflow(
        &self,
        request: &WorkflowCreateRequest,
    ) -> Result<WorkflowRecord, ApiError> {
        self.request(Method::POST, workflows_path(), Some(request)).await
    }

    async fn cancel_workflow(&self, id: &str) -> Result<WorkflowRecord, ApiError> {
        self.request(Method::POST, &cancel_path(id), None::<&()>).await
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), ApiError> {
        self.request_empty(Method::DELETE, &workflow_path(id), None::<&()>)
            .await
    }

    async fn list_agents(&self) -> Result<Vec<AgentRecord>, ApiError> {
        self.request(Method::GET, agents_path(), None::<&()>).await
    }

    async fn fetch_agent(&self, id: &str) -> Result<AgentRecord, ApiError> {
        self.request(Method::GET, &agent_path(id), None::<&()>).await
    }

    fn retryable_statuses(&self) -> &[u16] {
        &self.retry_policy().retryable_statuses
    }
}

// ============================================================================
// TESTS
// ============================================================================
