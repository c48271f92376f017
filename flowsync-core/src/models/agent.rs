use serde::{Deserialize, Serialize};
use std::fmt;

use super::workflow::WorkflowRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Error,
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    pub status: AgentStatus,
    #[serde(default)]
    pub current_task: Option<String>,
}

impl AgentRecord {
    /// `current_task` is only meaningful while the agent is active.
    pub fn active_task(&self) -> Option<&str> {
        match self.status {
            AgentStatus::Active => self.current_task.as_deref(),
            _ => None,
        }
    }
}

/// A workflow's agent reference resolved against the known agent list.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRef<'a> {
    Known(&'a AgentRecord),
    Unknown(&'a str),
}

impl fmt::Display for AgentRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRef::Known(agent) if !agent.name.is_empty() => {
                write!(f, "{} ({})", agent.name, agent.status)
            }
            AgentRef::Known(agent) => write!(f, "{} ({})", agent.id, agent.status),
            AgentRef::Unknown(id) => write!(f, "unknown agent [{}]", id),
        }
    }
}

/// Resolve assigned agent IDs; dangling IDs become `AgentRef::Unknown`.
pub fn resolve_agents<'a>(
    workflow: &'a WorkflowRecord,
    agents: &'a [AgentRecord],
) -> Vec<AgentRef<'a>> {
    workflow
        .assigned_agents
        .iter()
        .map(|id| match agents.iter().find(|a| &a.id == id) {
            Some(agent) => AgentRef::Known(agent),
            None => AgentRef::Unknown(id.as_str()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{Priority, WorkflowStatus};
    use chrono::Utc;

    fn agent(id: &str, status: AgentStatus, task: Option<&str>) -> AgentRecord {
        AgentRecord {
            id: id.to_string(),
            name: format!("Agent {}", id),
            role: None,
            status,
            current_task: task.map(str::to_string),
        }
    }

    fn workflow_with_agents(ids: &[&str]) -> WorkflowRecord {
        WorkflowRecord {
            id: "wf-1".to_string(),
            name: "wf".to_string(),
            requirement: String::new(),
            workflow_type: "general".to_string(),
            priority: Priority::Medium,
            tags: vec![],
            status: WorkflowStatus::Running,
            current_step: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            assigned_agents: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_active_task_only_when_active() {
        let busy = agent("a", AgentStatus::Active, Some("compile"));
        let idle = agent("b", AgentStatus::Idle, Some("stale task"));
        assert_eq!(busy.active_task(), Some("compile"));
        assert_eq!(idle.active_task(), None);
    }

    #[test]
    fn test_resolve_agents_tolerates_dangling_ids() {
        let agents = vec![agent("a", AgentStatus::Idle, None)];
        let wf = workflow_with_agents(&["a", "ghost"]);

        let resolved = resolve_agents(&wf, &agents);
        assert_eq!(resolved.len(), 2);
        assert!(matches!(resolved[0], AgentRef::Known(a) if a.id == "a"));
        assert_eq!(resolved[1], AgentRef::Unknown("ghost"));
        assert_eq!(resolved[1].to_string(), "unknown agent [ghost]");
    }

    #[test]
    fn test_agent_status_wire_format() {
        let parsed: AgentRecord = serde_json::from_value(serde_json::json!({
            "id": "agent-7",
            "status": "offline"
        }))
        .unwrap();
        assert_eq!(parsed.status, AgentStatus::Offline);
        assert!(parsed.name.is_empty());
        assert!(parsed.current_task.is_none());
    }
}
