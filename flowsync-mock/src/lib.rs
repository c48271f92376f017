pub mod backend;
pub mod http;

pub use backend::{MockBackend, MockError, WorkflowChange};
pub use http::{build_router, serve, start_mock_server};
