//! In-memory workflow backend.
//!
//! Workflows advance one phase (`pending -> running -> completed`) every
//! `steps_per_phase` reads, which is enough to exercise the client's polling
//! and settle logic without a real orchestration engine. A workflow tagged
//! `fail` ends in `failed` instead of `completed`.
//!
//! Every status change is also broadcast as a [`WorkflowChange`] so the push
//! endpoint can notify connected clients.

use chrono::Utc;
use flowsync_core::config::MockConfig;
use flowsync_core::{AgentRecord, AgentStatus, WorkflowCreateRequest, WorkflowRecord, WorkflowStatus};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const CHANGE_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    NotFound(String),
    Conflict(String),
    Unavailable,
}

/// A workflow changed server-side. `record` is `None` once it was deleted.
#[derive(Debug, Clone)]
pub struct WorkflowChange {
    pub workflow_id: String,
    pub record: Option<WorkflowRecord>,
}

struct MockWorkflow {
    record: WorkflowRecord,
    reads: u32,
}

pub struct MockBackend {
    workflows: Mutex<BTreeMap<String, MockWorkflow>>,
    agents: Vec<AgentRecord>,
    steps_per_phase: u32,
    flaky_every: u32,
    requests: AtomicU64,
    changes: broadcast::Sender<WorkflowChange>,
}

impl MockBackend {
    pub fn new(config: &MockConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            workflows: Mutex::new(BTreeMap::new()),
            agents: Vec::new(),
            steps_per_phase: config.steps_per_phase.max(1),
            flaky_every: config.flaky_every,
            requests: AtomicU64::new(0),
            changes,
        }
    }

    /// Backend pre-populated with a few agents and workflows.
    pub fn seeded(config: &MockConfig) -> Self {
        let mut backend = Self::new(config);
        backend.agents = vec![
            agent("agent-planner", "Planner", "planning", AgentStatus::Active, Some("Drafting plan")),
            agent("agent-coder", "Coder", "implementation", AgentStatus::Idle, None),
            agent("agent-reviewer", "Reviewer", "review", AgentStatus::Offline, None),
        ];

        let now = Utc::now();
        let seeds = [
            ("wf-seed-running", "Refactor billing module", WorkflowStatus::Running, vec!["agent-planner", "agent-coder"]),
            ("wf-seed-done", "Add audit logging", WorkflowStatus::Completed, vec!["agent-reviewer", "agent-retired"]),
        ];
        let workflows = backend.workflows.get_mut();
        for (id, name, status, agents) in seeds {
            let record = WorkflowRecord {
                id: id.to_string(),
                name: name.to_string(),
                requirement: format!("{} end to end", name),
                workflow_type: "development".to_string(),
                priority: Default::default(),
                tags: vec!["seed".to_string()],
                status,
                current_step: (status == WorkflowStatus::Running).then(|| "executing".to_string()),
                error_message: None,
                created_at: now,
                updated_at: now,
                completed_at: status.is_terminal().then_some(now),
                assigned_agents: agents.into_iter().map(str::to_string).collect(),
            };
            workflows.insert(id.to_string(), MockWorkflow { record, reads: 0 });
        }

        backend
    }

    /// Count a request and fail it if fault injection says so.
    pub fn check_fault(&self) -> Result<(), MockError> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if self.flaky_every > 0 && n % self.flaky_every as u64 == 0 {
            tracing::debug!(request = n, "Injecting 503");
            return Err(MockError::Unavailable);
        }
        Ok(())
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<WorkflowChange> {
        self.changes.subscribe()
    }

    /// Connected push clients.
    pub fn push_listeners(&self) -> usize {
        self.changes.receiver_count()
    }

    fn publish(&self, workflow_id: &str, record: Option<&WorkflowRecord>) {
        // No receivers is the normal case without push clients.
        let _ = self.changes.send(WorkflowChange {
            workflow_id: workflow_id.to_string(),
            record: record.cloned(),
        });
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowRecord> {
        let mut workflows = self.workflows.lock().await;
        workflows
            .values_mut()
            .map(|wf| {
                self.advance(wf);
                wf.record.clone()
            })
            .collect()
    }

    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowRecord, MockError> {
        let mut workflows = self.workflows.lock().await;
        let wf = workflows
            .get_mut(id)
            .ok_or_else(|| MockError::NotFound(format!("workflow {} not found", id)))?;
        self.advance(wf);
        Ok(wf.record.clone())
    }

    pub async fn create_workflow(&self, request: WorkflowCreateRequest) -> WorkflowRecord {
        let now = Utc::now();
        let assigned = self
            .agents
            .iter()
            .find(|a| a.status == AgentStatus::Idle)
            .map(|a| vec![a.id.clone()])
            .unwrap_or_default();

        let record = WorkflowRecord {
            id: format!("wf-{}", Uuid::new_v4()),
            name: request.name,
            requirement: request.requirement,
            workflow_type: request.workflow_type,
            priority: request.priority,
            tags: request.tags,
            status: WorkflowStatus::Pending,
            current_step: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            assigned_agents: assigned,
        };

        tracing::info!(workflow_id = %record.id, "Mock workflow created");
        self.workflows.lock().await.insert(
            record.id.clone(),
            MockWorkflow {
                record: record.clone(),
                reads: 0,
            },
        );
        record
    }

    pub async fn cancel_workflow(&self, id: &str) -> Result<WorkflowRecord, MockError> {
        let mut workflows = self.workflows.lock().await;
        let wf = workflows
            .get_mut(id)
            .ok_or_else(|| MockError::NotFound(format!("workflow {} not found", id)))?;

        if wf.record.is_terminal() {
            return Err(MockError::Conflict(format!(
                "workflow {} is already {}",
                id, wf.record.status
            )));
        }

        let now = Utc::now();
        wf.record.status = WorkflowStatus::Cancelled;
        wf.record.current_step = None;
        wf.record.updated_at = now;
        wf.record.completed_at = Some(now);
        tracing::info!(workflow_id = id, "Mock workflow cancelled");
        self.publish(id, Some(&wf.record));
        Ok(wf.record.clone())
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<(), MockError> {
        match self.workflows.lock().await.remove(id) {
            Some(_) => {
                self.publish(id, None);
                Ok(())
            }
            None => Err(MockError::NotFound(format!("workflow {} not found", id))),
        }
    }

    pub fn list_agents(&self) -> Vec<AgentRecord> {
        self.agents.clone()
    }

    pub fn get_agent(&self, id: &str) -> Result<AgentRecord, MockError> {
        self.agents
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| MockError::NotFound(format!("agent {} not found", id)))
    }

    fn advance(&self, wf: &mut MockWorkflow) {
        if wf.record.is_terminal() {
            return;
        }

        wf.reads += 1;
        if wf.reads < self.steps_per_phase {
            return;
        }
        wf.reads = 0;

        let now = Utc::now();
        let record = &mut wf.record;
        match record.status {
            WorkflowStatus::Pending => {
                record.status = WorkflowStatus::Running;
                record.current_step = Some("executing".to_string());
            }
            WorkflowStatus::Running if record.tags.iter().any(|t| t == "fail") => {
                record.status = WorkflowStatus::Failed;
                record.current_step = None;
                record.error_message = Some("simulated failure".to_string());
                record.completed_at = Some(now);
            }
            WorkflowStatus::Running => {
                record.status = WorkflowStatus::Completed;
                record.current_step = None;
                record.completed_at = Some(now);
            }
            _ => return,
        }
        record.updated_at = now;
        tracing::debug!(workflow_id = %record.id, status = %record.status, "Mock workflow advanced");
        self.publish(&record.id, Some(&*record));
    }
}

fn agent(id: &str, name: &str, role: &str, status: AgentStatus, task: Option<&str>) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        name: name.to_string(),
        role: Some(role.to_string()),
        status,
        current_task: task.map(str::to_string),
    }
}
