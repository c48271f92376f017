//! Polling cadence.
//!
//! The next poll is always decided from the outcome of the fetch that just
//! finished, never from a schedule fixed at subscription time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::api::WorkflowApi;
use crate::error::ApiError;
use crate::models::{AgentRecord, WorkflowRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Cadence for a single non-terminal resource.
    pub active_interval_ms: u64,
    /// Cadence for collection polls (workflow list, agents).
    pub list_interval_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            active_interval_ms: 2000,
            list_interval_ms: 5000,
        }
    }
}

impl PollPolicy {
    pub fn active_interval(&self) -> Duration {
        Duration::from_millis(self.active_interval_ms)
    }

    pub fn list_interval(&self) -> Duration {
        Duration::from_millis(self.list_interval_ms)
    }

    /// Decision for a single workflow after a fetch.
    ///
    /// Transient errors (network, decode, statuses in `retryable`) keep the
    /// active cadence since the status is unknown, not terminal. Any other
    /// HTTP status is a permanent answer and ends polling.
    pub fn after_workflow_fetch(
        &self,
        outcome: Result<&WorkflowRecord, &ApiError>,
        retryable: &[u16],
    ) -> PollDecision {
        match outcome {
            Ok(record) if record.is_terminal() => PollDecision::Settle,
            Ok(_) => PollDecision::After(self.active_interval()),
            Err(e) if e.is_permanent(retryable) => PollDecision::Abandon,
            Err(_) => PollDecision::After(self.active_interval()),
        }
    }

    /// Decision for collection polls: unconditional, errors included.
    pub fn after_list_fetch(&self) -> PollDecision {
        PollDecision::After(self.list_interval())
    }

    /// Decision for a single agent. Agents never settle.
    pub fn after_agent_fetch(
        &self,
        outcome: Result<&AgentRecord, &ApiError>,
        retryable: &[u16],
    ) -> PollDecision {
        match outcome {
            Err(e) if e.is_permanent(retryable) => PollDecision::Abandon,
            _ => PollDecision::After(self.list_interval()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Fetch again after the delay (or sooner on an invalidation).
    After(Duration),
    /// Terminal state observed; stop polling.
    Settle,
    /// The server refused the resource for good (gone, forbidden, ...);
    /// stop polling.
    Abandon,
}

/// Something the store can keep in sync by repeated fetching.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Log label, e.g. `workflow:wf-1`.
    fn label(&self) -> String;

    async fn fetch(&self, api: &dyn WorkflowApi) -> Result<Self::Value, ApiError>;

    /// `retryable` is the transport's transient status list; see
    /// [`ApiError::is_permanent`].
    fn decide(
        &self,
        policy: &PollPolicy,
        outcome: Result<&Self::Value, &ApiError>,
        retryable: &[u16],
    ) -> PollDecision;

    /// Whether `next` may replace the held value.
    fn accepts(&self, _current: &Self::Value, _next: &Self::Value) -> bool {
        true
    }
}

pub struct WorkflowTarget {
    pub id: String,
}

#[async_trait]
impl PollTarget for WorkflowTarget {
    type Value = WorkflowRecord;

    fn label(&self) -> String {
        format!("workflow:{}", self.id)
    }

    async fn fetch(&self, api: &dyn WorkflowApi) -> Result<WorkflowRecord, ApiError> {
        api.fetch_workflow(&self.id).await
    }

    fn decide(
        &self,
        policy: &PollPolicy,
        outcome: Result<&WorkflowRecord, &ApiError>,
        retryable: &[u16],
    ) -> PollDecision {
        policy.after_workflow_fetch(outcome, retryable)
    }

    fn accepts(&self, current: &WorkflowRecord, next: &WorkflowRecord) -> bool {
        current.accepts_update(next)
    }
}

pub struct WorkflowListTarget;

#[async_trait]
impl PollTarget for WorkflowListTarget {
    type Value = Vec<WorkflowRecord>;

    fn label(&self) -> String {
        "workflows".to_string()
    }

    async fn fetch(&self, api: &dyn WorkflowApi) -> Result<Vec<WorkflowRecord>, ApiError> {
        api.list_workflows().await
    }

    fn decide(
        &self,
        policy: &PollPolicy,
        _outcome: Result<&Vec<WorkflowRecord>, &ApiError>,
        _retryable: &[u16],
    ) -> PollDecision {
        policy.after_list_fetch()
    }
}

pub struct AgentTarget {
    pub id: String,
}

#[async_trait]
impl PollTarget for AgentTarget {
    type Value = AgentRecord;

    fn label(&self) -> String {
        format!("agent:{}", self.id)
    }

    async fn fetch(&self, api: &dyn WorkflowApi) -> Result<AgentRecord, ApiError> {
        api.fetch_agent(&self.id).await
    }

    fn decide(
        &self,
        policy: &PollPolicy,
        outcome: Result<&AgentRecord, &ApiError>,
        retryable: &[u16],
    ) -> PollDecision {
        policy.after_agent_fetch(outcome, retryable)
    }
}

pub struct AgentListTarget;

#[async_trait]
impl PollTarget for AgentListTarget {
    type Value = Vec<AgentRecord>;

    fn label(&self) -> String {
        "agents".to_string()
    }

    async fn fetch(&self, api: &dyn WorkflowApi) -> Result<Vec<AgentRecord>, ApiError> {
        api.list_agents().await
    }

    fn decide(
        &self,
        policy: &PollPolicy,
        _outcome: Result<&Vec<AgentRecord>, &ApiError>,
        _retryable: &[u16],
    ) -> PollDecision {
        policy.after_list_fetch()
    }
}
