//! Plain-text rendering for terminal output.

use flowsync_core::{
    resolve_agents, AgentRecord, SyncPhase, SyncState, WorkflowRecord, WorkflowStatus,
};

const STATUS_ORDER: [WorkflowStatus; 5] = [
    WorkflowStatus::Pending,
    WorkflowStatus::Running,
    WorkflowStatus::Completed,
    WorkflowStatus::Failed,
    WorkflowStatus::Cancelled,
];

/// One row of `flowsync list`.
pub fn workflow_line(wf: &WorkflowRecord) -> String {
    let step = wf
        .current_step
        .as_deref()
        .map(|s| format!(" [{}]", s))
        .unwrap_or_default();
    format!(
        "{:<42} {:<9} {:<8} {}{}",
        wf.id,
        wf.status.as_str(),
        wf.priority.as_str(),
        wf.name,
        step
    )
}

pub fn agent_line(agent: &AgentRecord) -> String {
    let mut line = format!("{:<20} {:<8} {}", agent.id, agent.status.to_string(), agent.name);
    if let Some(role) = agent.role.as_deref() {
        line.push_str(&format!(" ({})", role));
    }
    if let Some(task) = agent.active_task() {
        line.push_str(&format!(": {}", task));
    }
    line
}

/// Multi-line view for `flowsync show`.
pub fn workflow_detail(wf: &WorkflowRecord, agents: &[AgentRecord]) -> String {
    let mut out = vec![
        format!("ID:          {}", wf.id),
        format!("Name:        {}", wf.name),
        format!("Type:        {}", wf.workflow_type),
        format!("Priority:    {}", wf.priority.as_str()),
        format!("Status:      {}", wf.status),
    ];
    if let Some(step) = wf.current_step.as_deref() {
        out.push(format!("Step:        {}", step));
    }
    if let Some(err) = wf.error_message.as_deref() {
        out.push(format!("Error:       {}", err));
    }
    if !wf.tags.is_empty() {
        out.push(format!("Tags:        {}", wf.tags.join(", ")));
    }
    out.push(format!("Created:     {}", wf.created_at.to_rfc3339()));
    out.push(format!("Updated:     {}", wf.updated_at.to_rfc3339()));
    if let Some(done) = wf.completed_at {
        out.push(format!("Completed:   {}", done.to_rfc3339()));
    }
    if !wf.requirement.is_empty() {
        out.push(format!("Requirement: {}", wf.requirement));
    }

    let resolved = resolve_agents(wf, agents);
    if resolved.is_empty() {
        out.push("Agents:      none".to_string());
    } else {
        out.push("Agents:".to_string());
        for agent in resolved {
            out.push(format!("  - {}", agent));
        }
    }

    out.join("\n")
}

/// Status line for `flowsync watch`: last known value plus sync health.
pub fn sync_line(state: &SyncState<WorkflowRecord>) -> String {
    let mut line = match &state.value {
        Some(wf) => {
            let mut s = wf.status.to_string();
            if let Some(step) = wf.current_step.as_deref() {
                s.push_str(&format!(" [{}]", step));
            }
            s
        }
        None => "unknown".to_string(),
    };

    match state.phase {
        SyncPhase::Settled => line.push_str(" (final)"),
        SyncPhase::Gone => line.push_str(" (gone: no longer exists on server)"),
        SyncPhase::Rejected => {
            let reason = state
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            line.push_str(&format!(" (stopped: {})", reason));
        }
        SyncPhase::Polling => {}
    }

    if matches!(state.phase, SyncPhase::Polling | SyncPhase::Settled) {
        if let Some(err) = &state.error {
            let since = state
                .error_since
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string());
            line.push_str(&format!(
                " (sync failing x{} since {}: {})",
                state.consecutive_failures, since, err
            ));
        }
    }

    line
}

/// One `watch --json` record: the value plus sync health, so a failing or
/// stopped sync is visible to machine consumers too.
pub fn sync_json(state: &SyncState<WorkflowRecord>) -> serde_json::Value {
    serde_json::json!({
        "workflow": state.value,
        "phase": state.phase.as_str(),
        "error": state.error.as_ref().map(|e| e.to_string()),
        "error_since": state.error_since.map(|t| t.to_rfc3339()),
    })
}

/// "5 workflows: 1 pending, 2 running, 2 completed"
pub fn list_summary(workflows: &[WorkflowRecord]) -> String {
    let counts: Vec<String> = STATUS_ORDER
        .iter()
        .filter_map(|status| {
            let n = workflows.iter().filter(|w| w.status == *status).count();
            (n > 0).then(|| format!("{} {}", n, status))
        })
        .collect();

    let noun = if workflows.len() == 1 { "workflow" } else { "workflows" };
    if counts.is_empty() {
        format!("{} {}", workflows.len(), noun)
    } else {
        format!("{} {}: {}", workflows.len(), noun, counts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flowsync_core::{AgentStatus, ApiError, Priority};

    fn wf(id: &str, status: WorkflowStatus) -> WorkflowRecord {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        WorkflowRecord {
            id: id.to_string(),
            name: "Nightly build".to_string(),
            requirement: String::new(),
            workflow_type: "ci".to_string(),
            priority: Priority::High,
            tags: vec![],
            status,
            current_step: None,
            error_message: None,
            created_at: t,
            updated_at: t,
            completed_at: None,
            assigned_agents: vec![],
        }
    }

    #[test]
    fn test_workflow_line_includes_step() {
        let mut w = wf("wf-1", WorkflowStatus::Running);
        w.current_step = Some("compile".to_string());
        let line = workflow_line(&w);
        assert!(line.starts_with("wf-1 "));
        assert!(line.contains("running"));
        assert!(line.contains("high"));
        assert!(line.ends_with("Nightly build [compile]"));
    }

    #[test]
    fn test_detail_lists_unknown_agents() {
        let mut w = wf("wf-1", WorkflowStatus::Running);
        w.assigned_agents = vec!["a1".to_string(), "ghost".to_string()];
        let agents = vec![AgentRecord {
            id: "a1".to_string(),
            name: "Builder".to_string(),
            role: None,
            status: AgentStatus::Active,
            current_task: None,
        }];
        let detail = workflow_detail(&w, &agents);
        assert!(detail.contains("  - Builder (active)"));
        assert!(detail.contains("  - unknown agent [ghost]"));
    }

    #[test]
    fn test_sync_line_marks_failing_but_keeps_value() {
        let mut state = SyncState {
            value: Some(wf("wf-1", WorkflowStatus::Running)),
            ..SyncState::default()
        };
        assert_eq!(sync_line(&state), "running");

        state.error = Some(ApiError::Network {
            message: "connection refused".to_string(),
        });
        state.error_since = Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 5, 7).unwrap());
        state.consecutive_failures = 3;
        let line = sync_line(&state);
        assert!(line.starts_with("running (sync failing x3 since 10:05:07: "));
        assert!(line.contains("connection refused"));
    }

    #[test]
    fn test_sync_line_phases() {
        let mut state = SyncState {
            value: Some(wf("wf-1", WorkflowStatus::Completed)),
            phase: SyncPhase::Settled,
            ..SyncState::default()
        };
        assert_eq!(sync_line(&state), "completed (final)");

        state.phase = SyncPhase::Gone;
        state.error = Some(ApiError::Http {
            status: 404,
            body: String::new(),
        });
        assert_eq!(
            sync_line(&state),
            "completed (gone: no longer exists on server)"
        );
    }

    #[test]
    fn test_sync_line_rejected_shows_reason() {
        let state = SyncState {
            value: Some(wf("wf-1", WorkflowStatus::Running)),
            phase: SyncPhase::Rejected,
            error: Some(ApiError::Http {
                status: 403,
                body: "forbidden".to_string(),
            }),
            consecutive_failures: 1,
            ..SyncState::default()
        };
        assert_eq!(
            sync_line(&state),
            "running (stopped: HTTP error (403): forbidden)"
        );
    }

    #[test]
    fn test_sync_json_carries_sync_health() {
        let mut state = SyncState {
            value: Some(wf("wf-1", WorkflowStatus::Running)),
            ..SyncState::default()
        };
        let healthy = sync_json(&state);
        assert_eq!(healthy["workflow"]["status"], "running");
        assert_eq!(healthy["phase"], "polling");
        assert!(healthy["error"].is_null());

        state.error = Some(ApiError::Network {
            message: "connection refused".to_string(),
        });
        state.error_since = Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 5, 7).unwrap());
        state.consecutive_failures = 1;
        let failing = sync_json(&state);
        assert_ne!(failing, healthy);
        assert_eq!(failing["workflow"]["status"], "running");
        assert!(failing["error"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
        assert_eq!(failing["error_since"], "2026-03-01T10:05:07+00:00");

        // Further failures of the same kind render identically, so the
        // watcher prints them once.
        state.consecutive_failures = 4;
        assert_eq!(sync_json(&state), failing);
    }

    #[test]
    fn test_list_summary_counts_in_lifecycle_order() {
        let list = vec![
            wf("a", WorkflowStatus::Completed),
            wf("b", WorkflowStatus::Running),
            wf("c", WorkflowStatus::Completed),
        ];
        assert_eq!(list_summary(&list), "3 workflows: 1 running, 2 completed");
        assert_eq!(list_summary(&[]), "0 workflows");
        assert_eq!(
            list_summary(&[wf("d", WorkflowStatus::Pending)]),
            "1 workflow: 1 pending"
        );
    }

    #[test]
    fn test_agent_line_hides_task_unless_active() {
        let mut agent = AgentRecord {
            id: "agent-1".to_string(),
            name: "Coder".to_string(),
            role: Some("implementation".to_string()),
            status: AgentStatus::Idle,
            current_task: Some("stale task".to_string()),
        };
        assert!(!agent_line(&agent).contains("stale task"));
        agent.status = AgentStatus::Active;
        assert!(agent_line(&agent).ends_with("Coder (implementation): stale task"));
    }
}
