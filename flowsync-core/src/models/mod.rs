pub mod agent;
pub mod workflow;

pub use agent::{resolve_agents, AgentRecord, AgentRef, AgentStatus};
pub use workflow::{Priority, WorkflowCreateRequest, WorkflowRecord, WorkflowStatus};
