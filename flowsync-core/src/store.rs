//! Synchronization store.
//!
//! Each tracked resource gets exactly one poller task. The task is the only
//! writer of that resource's state and publishes it through a `watch`
//! channel, so there is never more than one fetch in flight per resource and
//! results are applied in issuance order.
//!
//! Subscriptions are reference counted. Dropping the last [`Subscription`]
//! for a resource removes it from the registry and cancels its poller
//! synchronously; a fetch already in flight finishes but its result is
//! discarded. A poller started for the same resource while the old one is
//! still finishing that fetch waits for it, so fetches never overlap.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::api::WorkflowApi;
use crate::error::ApiError;
use crate::models::{AgentRecord, WorkflowCreateRequest, WorkflowRecord};
use crate::scheduler::{
    AgentListTarget, AgentTarget, PollDecision, PollPolicy, PollTarget, WorkflowListTarget,
    WorkflowTarget,
};

/// Registry key for collection subscriptions.
const ALL: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Poller is active.
    Polling,
    /// Terminal state observed; value is final.
    Settled,
    /// Server reported the resource no longer exists.
    Gone,
    /// Server refused with a non-retryable status (401, 403, ...); polling
    /// stopped and `error` holds the answer.
    Rejected,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Polling => "polling",
            SyncPhase::Settled => "settled",
            SyncPhase::Gone => "gone",
            SyncPhase::Rejected => "rejected",
        }
    }
}

/// Snapshot published to subscribers.
#[derive(Debug, Clone)]
pub struct SyncState<T> {
    /// Last successfully fetched value. Never cleared by a failed fetch.
    pub value: Option<T>,
    pub phase: SyncPhase,
    /// Most recent error, cleared on the next success.
    pub error: Option<ApiError>,
    /// When the current error streak began.
    pub error_since: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Completed fetches applied to this state, successes and failures.
    pub fetch_count: u64,
}

impl<T> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            value: None,
            phase: SyncPhase::Polling,
            error: None,
            error_since: None,
            consecutive_failures: 0,
            last_synced_at: None,
            fetch_count: 0,
        }
    }
}

impl<T> SyncState<T> {
    /// "Sync failing" indicator: errors are persisting.
    pub fn is_failing(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.phase == SyncPhase::Polling
    }

    fn record_success(&mut self, value: T) {
        self.value = Some(value);
        self.error = None;
        self.error_since = None;
        self.consecutive_failures = 0;
        self.last_synced_at = Some(Utc::now());
        self.fetch_count += 1;
    }

    fn record_failure(&mut self, error: ApiError) {
        if self.error.as_ref() != Some(&error) {
            self.error_since = Some(Utc::now());
        }
        self.error = Some(error);
        self.consecutive_failures += 1;
        self.fetch_count += 1;
    }
}

// ============================================================================
// Registry
// ============================================================================

struct Slot<T> {
    rx: watch::Receiver<SyncState<T>>,
    subscribers: usize,
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    /// Cancelled by the poller task itself when it exits.
    done: CancellationToken,
}

struct Registry<T> {
    slots: DashMap<String, Slot<T>>,
    /// Exit signals of released pollers that may still be inside a fetch.
    draining: DashMap<String, CancellationToken>,
}

impl<T: Clone + Send + Sync + 'static> Registry<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            draining: DashMap::new(),
        })
    }

    fn subscribe<P>(
        self: &Arc<Self>,
        key: &str,
        target: impl FnOnce() -> P,
        api: &Arc<dyn WorkflowApi>,
        policy: PollPolicy,
    ) -> Subscription<T>
    where
        P: PollTarget<Value = T>,
    {
        let rx = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                slot.subscribers += 1;
                tracing::debug!(resource = key, subscribers = slot.subscribers, "Joined existing subscription");
                slot.rx.clone()
            }
            Entry::Vacant(e) => {
                let (tx, rx) = watch::channel(SyncState::default());
                let cancel = CancellationToken::new();
                let refresh = Arc::new(Notify::new());
                let done = CancellationToken::new();
                let previous = self
                    .draining
                    .remove(key)
                    .map(|(_, t)| t)
                    .filter(|t| !t.is_cancelled());

                tokio::spawn(run_poller(
                    target(),
                    Arc::clone(api),
                    policy,
                    tx,
                    PollerSignals {
                        cancel: cancel.clone(),
                        refresh: Arc::clone(&refresh),
                        previous,
                        done: done.clone(),
                    },
                ));

                e.insert(Slot {
                    rx: rx.clone(),
                    subscribers: 1,
                    cancel,
                    refresh,
                    done,
                });
                tracing::info!(resource = key, "Started tracking");
                rx
            }
        };

        Subscription {
            key: key.to_string(),
            rx,
            registry: Arc::clone(self),
        }
    }

    fn retain(&self, key: &str) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.subscribers += 1;
        }
    }

    fn release(&self, key: &str) {
        self.draining.retain(|_, done| !done.is_cancelled());

        if let Entry::Occupied(mut e) = self.slots.entry(key.to_string()) {
            let slot = e.get_mut();
            slot.subscribers = slot.subscribers.saturating_sub(1);
            if slot.subscribers == 0 {
                // Recorded while the slot entry is still locked so a
                // concurrent subscribe cannot miss it.
                self.draining.insert(key.to_string(), slot.done.clone());
                let slot = e.remove();
                slot.cancel.cancel();
                tracing::info!(resource = key, "Last subscriber left, stopped tracking");
            }
        }
    }

    /// Wake the poller for an immediate fetch. Returns false if untracked.
    fn invalidate(&self, key: &str) -> bool {
        match self.slots.get(key) {
            Some(slot) => {
                slot.refresh.notify_one();
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Reference-counted handle on a tracked resource.
pub struct Subscription<T: Clone + Send + Sync + 'static> {
    key: String,
    rx: watch::Receiver<SyncState<T>>,
    registry: Arc<Registry<T>>,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest published snapshot.
    pub fn current(&self) -> SyncState<T> {
        self.rx.borrow().clone()
    }

    /// A raw receiver that does not hold the subscription open.
    pub fn receiver(&self) -> watch::Receiver<SyncState<T>> {
        self.rx.clone()
    }

    /// Wait for the next published snapshot. `None` once the poller has
    /// stopped (settled, gone or unsubscribed) and nothing new will arrive.
    pub async fn changed(&mut self) -> Option<SyncState<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SyncState<T>) -> bool,
    ) -> Option<SyncState<T>> {
        let state = self.rx.wait_for(|s| predicate(s)).await.ok()?;
        Some(state.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        self.registry.retain(&self.key);
        Self {
            key: self.key.clone(),
            rx: self.rx.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

// ============================================================================
// Poller
// ============================================================================

struct PollerSignals {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    /// Exit signal of the previous poller for the same resource, if it was
    /// released with a fetch still in flight.
    previous: Option<CancellationToken>,
    done: CancellationToken,
}

async fn run_poller<P: PollTarget>(
    target: P,
    api: Arc<dyn WorkflowApi>,
    policy: PollPolicy,
    tx: watch::Sender<SyncState<P::Value>>,
    signals: PollerSignals,
) {
    let PollerSignals {
        cancel,
        refresh,
        previous,
        done,
    } = signals;
    let _done = done.drop_guard();
    let label = target.label();

    if let Some(previous) = previous {
        tracing::debug!(resource = %label, "Waiting for previous poller to finish its fetch");
        tokio::select! {
            _ = cancel.cancelled() => {
                // Exit only after the predecessor so a later poller that
                // waits on us also waits on it.
                previous.cancelled().await;
                return;
            }
            _ = previous.cancelled() => {}
        }
    }

    loop {
        let result = target.fetch(api.as_ref()).await;

        if cancel.is_cancelled() {
            tracing::debug!(resource = %label, "Unsubscribed while fetch was in flight, result discarded");
            return;
        }

        let outcome = match result {
            Ok(next) => {
                let held = tx.borrow().value.clone();
                match held {
                    Some(current) if !target.accepts(&current, &next) => {
                        tracing::debug!(resource = %label, "Ignoring stale or post-terminal update");
                        Ok(current)
                    }
                    _ => Ok(next),
                }
            }
            Err(e) => {
                tracing::warn!(resource = %label, kind = e.kind(), error = %e, "Poll failed, keeping last known state");
                Err(e)
            }
        };

        let decision = target.decide(&policy, outcome.as_ref(), api.retryable_statuses());
        let phase = match decision {
            PollDecision::After(_) => SyncPhase::Polling,
            PollDecision::Settle => SyncPhase::Settled,
            PollDecision::Abandon if outcome.as_ref().is_err_and(ApiError::is_gone) => SyncPhase::Gone,
            PollDecision::Abandon => SyncPhase::Rejected,
        };

        tx.send_modify(|state| {
            match outcome {
                Ok(value) => state.record_success(value),
                Err(e) => state.record_failure(e),
            }
            state.phase = phase;
        });

        match decision {
            PollDecision::After(delay) => {
                tracing::debug!(resource = %label, delay_ms = delay.as_millis() as u64, "Next poll scheduled");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = refresh.notified() => {
                        tracing::debug!(resource = %label, "Invalidated, fetching now");
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            PollDecision::Settle => {
                tracing::info!(resource = %label, "Terminal state observed, polling stopped");
                return;
            }
            PollDecision::Abandon => {
                tracing::info!(resource = %label, phase = phase.as_str(), "Server refused resource, polling stopped");
                return;
            }
        }
    }
}

// ============================================================================
// SyncStore
// ============================================================================

/// Holds the latest known state of every subscribed workflow / agent and
/// reconciles mutations with polling.
#[derive(Clone)]
pub struct SyncStore {
    api: Arc<dyn WorkflowApi>,
    policy: PollPolicy,
    workflows: Arc<Registry<WorkflowRecord>>,
    workflow_list: Arc<Registry<Vec<WorkflowRecord>>>,
    agents: Arc<Registry<AgentRecord>>,
    agent_list: Arc<Registry<Vec<AgentRecord>>>,
}

impl SyncStore {
    pub fn new(api: Arc<dyn WorkflowApi>, policy: PollPolicy) -> Self {
        Self {
            api,
            policy,
            workflows: Registry::new(),
            workflow_list: Registry::new(),
            agents: Registry::new(),
            agent_list: Registry::new(),
        }
    }

    pub fn api(&self) -> &Arc<dyn WorkflowApi> {
        &self.api
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Track one workflow until it settles, disappears or is unsubscribed.
    /// Must be called inside a tokio runtime.
    pub fn subscribe_workflow(&self, id: &str) -> Subscription<WorkflowRecord> {
        self.workflows.subscribe(
            id,
            || WorkflowTarget { id: id.to_string() },
            &self.api,
            self.policy,
        )
    }

    /// Track the full workflow list at the list cadence.
    pub fn subscribe_workflows(&self) -> Subscription<Vec<WorkflowRecord>> {
        self.workflow_list
            .subscribe(ALL, || WorkflowListTarget, &self.api, self.policy)
    }

    pub fn subscribe_agent(&self, id: &str) -> Subscription<AgentRecord> {
        self.agents.subscribe(
            id,
            || AgentTarget { id: id.to_string() },
            &self.api,
            self.policy,
        )
    }

    pub fn subscribe_agents(&self) -> Subscription<Vec<AgentRecord>> {
        self.agent_list
            .subscribe(ALL, || AgentListTarget, &self.api, self.policy)
    }

    /// Invalidation hook: fetch this workflow now if it is tracked.
    pub fn refresh_workflow(&self, id: &str) -> bool {
        self.workflows.invalidate(id)
    }

    pub fn refresh_workflows(&self) -> bool {
        self.workflow_list.invalidate(ALL)
    }

    /// Request cancellation. Local state is never written here: once the
    /// server acknowledges, the tracked workflow is re-fetched and that fetch
    /// decides what the status really is.
    pub async fn cancel_workflow(&self, id: &str) -> Result<(), ApiError> {
        let ack = self.api.cancel_workflow(id).await?;
        tracing::info!(
            workflow_id = id,
            acknowledged_status = %ack.status,
            "Cancel accepted, re-fetching authoritative state"
        );
        self.workflows.invalidate(id);
        self.workflow_list.invalidate(ALL);
        Ok(())
    }

    pub async fn create_workflow(
        &self,
        request: &WorkflowCreateRequest,
    ) -> Result<WorkflowRecord, ApiError> {
        let created = self.api.create_workflow(request).await?;
        tracing::info!(workflow_id = %created.id, "Workflow created");
        self.workflow_list.invalidate(ALL);
        Ok(created)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<(), ApiError> {
        self.api.delete_workflow(id).await?;
        tracing::info!(workflow_id = id, "Workflow deleted");
        self.workflows.invalidate(id);
        self.workflow_list.invalidate(ALL);
        Ok(())
    }

    /// Number of individually tracked workflows.
    pub fn tracked_workflows(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_tracking_workflow_list(&self) -> bool {
        self.workflow_list.len() > 0
    }
}

// ============================================================================
// TESTS
// ============================================================================
