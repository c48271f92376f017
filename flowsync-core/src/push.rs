//! WebSocket push channel.
//!
//! Frames are invalidation signals only: whatever a frame says, the reaction
//! is a re-fetch of the workflow through the store. Frame data is never
//! applied as state, and malformed frames still count as a poke.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::FlowsyncError;
use crate::store::SyncStore;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEventType {
    StatusUpdate,
    StepUpdate,
    AgentUpdate,
    Log,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(default = "unknown_event")]
    pub event_type: PushEventType,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn unknown_event() -> PushEventType {
    PushEventType::Unknown
}

impl PushEvent {
    /// Parse a text frame. Anything unparseable becomes an `Unknown` event.
    pub fn parse(frame: &str) -> Self {
        serde_json::from_str(frame).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Unparseable push frame, treating as unknown invalidation");
            PushEvent {
                event_type: PushEventType::Unknown,
                workflow_id: None,
                data: serde_json::Value::Null,
            }
        })
    }
}

/// Workflow ID a frame on `channel_id`'s socket should invalidate.
///
/// The socket is per workflow, so the channel ID wins when the frame names a
/// different (or no) workflow.
pub fn invalidation_target<'a>(channel_id: &'a str, event: &PushEvent) -> &'a str {
    if let Some(frame_id) = event.workflow_id.as_deref() {
        if frame_id != channel_id {
            tracing::debug!(
                channel = channel_id,
                frame_workflow = frame_id,
                "Push frame names another workflow, invalidating channel workflow"
            );
        }
    }
    channel_id
}

/// Consume text frames and poke the store for each one until the stream ends
/// or `cancel` fires. Returns the number of invalidations issued.
pub async fn run_push_listener<S>(
    store: &SyncStore,
    workflow_id: &str,
    mut frames: S,
    cancel: CancellationToken,
) -> usize
where
    S: Stream<Item = String> + Unpin,
{
    let mut pokes = 0usize;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };

        let Some(frame) = frame else {
            tracing::info!(workflow_id, "Push channel closed");
            break;
        };

        let event = PushEvent::parse(&frame);
        let target = invalidation_target(workflow_id, &event);
        tracing::debug!(workflow_id = target, event_type = ?event.event_type, "Push invalidation");

        if store.refresh_workflow(target) {
            pokes += 1;
        }
    }

    pokes
}

/// Push endpoint URL for a workflow: `{base}/{id}`.
pub fn push_url(base: &str, workflow_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), workflow_id)
}

/// Connect the WebSocket for `workflow_id` and feed it to
/// [`run_push_listener`]. Binary frames and pings are ignored.
pub async fn listen_workflow_push(
    store: SyncStore,
    base_url: &str,
    workflow_id: &str,
    cancel: CancellationToken,
) -> Result<usize, FlowsyncError> {
    let url = push_url(base_url, workflow_id);
    let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| FlowsyncError::Push(format!("connect {}: {}", url, e)))?;
    tracing::info!(url = %url, "Push channel connected");

    let frames = socket
        .take_while(|msg| futures::future::ready(msg.is_ok()))
        .filter_map(|msg| {
            futures::future::ready(match msg {
                Ok(Message::Text(text)) => Some(text),
                _ => None,
            })
        });

    Ok(run_push_listener(&store, workflow_id, Box::pin(frames), cancel).await)
}
