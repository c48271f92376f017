pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod push;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use api::WorkflowApi;
pub use config::FlowsyncConfig;
pub use error::{ApiError, FlowsyncError};
pub use models::{
    resolve_agents, AgentRecord, AgentRef, AgentStatus, Priority, WorkflowCreateRequest,
    WorkflowRecord, WorkflowStatus,
};
pub use push::{listen_workflow_push, run_push_listener, PushEvent, PushEventType};
pub use scheduler::{PollDecision, PollPolicy};
pub use store::{Subscription, SyncPhase, SyncState, SyncStore};
pub use transport::{ApiClient, ApiClientConfig, RetryPolicy};
