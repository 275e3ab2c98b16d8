//! `NodeActor` - per-node actor that owns one media node's lifecycle record.
//!
//! Each `NodeActor`:
//! - Owns the node's state, usage count and usage timestamps
//! - Serializes every read-modify-write through its mailbox
//! - Arms and cancels the idle-to-terminate countdown
//! - Issues termination requests to the provisioning gateway, with bounded
//!   retries on failure
//!
//! # Idle Reaping
//!
//! When the last session detaches:
//! 1. State moves RUNNING → WAITING_IDLE_TO_TERMINATE
//! 2. A single idle deadline is armed at grace-period distance
//! 3. A registration before the deadline reverts to RUNNING and disarms it;
//!    otherwise the deadline fires, state moves to TERMINATING and
//!    termination is requested
//!
//! The deadline lives in the same `select!` loop as the mailbox, so a racing
//! registration and deadline fire resolve in mailbox order: the loser
//! observes the already-updated state and no-ops.

use super::messages::{DropIdleOutcome, NodeMessage, NodeRecord};
use super::metrics::FleetMetrics;
use crate::config::FleetConfig;

use common::error::FleetError;
use common::gateway::ProvisioningGateway;
use common::types::{MediaNodeSnapshot, NodeEvent, NodeState};

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for a node mailbox.
const NODE_CHANNEL_BUFFER: usize = 64;

/// Point-in-time state and usage of a node, read lock-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: NodeState,
    pub usage_count: u32,
}

/// Atomic status cell published by the actor after every mutation.
///
/// Predicate reads go through this cell instead of the mailbox, so they are
/// plain snapshot reads that never block and never wait on actor work.
#[derive(Debug)]
pub struct NodeStatusCell {
    state: AtomicU8,
    usage: AtomicU32,
}

impl NodeStatusCell {
    fn new(state: NodeState) -> Self {
        Self {
            state: AtomicU8::new(state.as_u8()),
            usage: AtomicU32::new(0),
        }
    }

    fn publish(&self, state: NodeState, usage: u32) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
        self.usage.store(usage, Ordering::SeqCst);
    }

    /// Lifecycle state at the instant of the call.
    #[must_use]
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Usage count at the instant of the call.
    #[must_use]
    pub fn usage_count(&self) -> u32 {
        self.usage.load(Ordering::SeqCst)
    }
}

/// Handle to a `NodeActor`.
#[derive(Clone)]
pub struct NodeActorHandle {
    node_id: String,
    sender: mpsc::Sender<NodeMessage>,
    cancel_token: CancellationToken,
    status: Arc<NodeStatusCell>,
}

impl NodeActorHandle {
    /// Get the node ID.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Lock-free state/usage snapshot.
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            state: self.status.state(),
            usage_count: self.status.usage_count(),
        }
    }

    /// This node as a fleet-view row.
    #[must_use]
    pub fn snapshot_row(&self) -> MediaNodeSnapshot {
        let status = self.status();
        MediaNodeSnapshot::new(self.node_id.clone(), status.state, status.usage_count)
    }

    /// Record a session attachment.
    pub async fn register_usage(&self, time_of_connection: i64) -> Result<(), FleetError> {
        self.call(|respond_to| NodeMessage::RegisterUsage {
            time_of_connection,
            respond_to,
        })
        .await?
    }

    /// Record a session detachment.
    pub async fn deregister_usage(&self, time_of_disconnection: i64) -> Result<(), FleetError> {
        self.call(|respond_to| NodeMessage::DeregisterUsage {
            time_of_disconnection,
            respond_to,
        })
        .await?
    }

    /// Gateway confirmed availability.
    pub async fn confirm_available(&self) -> Result<(), FleetError> {
        self.call(|respond_to| NodeMessage::ConfirmAvailable { respond_to })
            .await?
    }

    /// Gateway aborted the launch.
    pub async fn abort_launch(&self) -> Result<(), FleetError> {
        self.call(|respond_to| NodeMessage::AbortLaunch { respond_to })
            .await?
    }

    /// Explicitly reclaim the node if it is waiting idle.
    pub async fn drop_idle(&self) -> Result<DropIdleOutcome, FleetError> {
        self.call(|respond_to| NodeMessage::DropIdle { respond_to })
            .await?
    }

    /// Gateway confirmed the compute instance is gone.
    pub async fn confirm_terminated(&self) -> Result<(), FleetError> {
        self.call(|respond_to| NodeMessage::ConfirmTerminated { respond_to })
            .await?
    }

    /// Gateway reported a failed termination attempt.
    pub async fn report_termination_failure(&self) -> Result<(), FleetError> {
        self.call(|respond_to| NodeMessage::TerminationFailed { respond_to })
            .await?
    }

    /// Full record snapshot.
    pub async fn record(&self) -> Result<NodeRecord, FleetError> {
        self.call(|respond_to| NodeMessage::GetRecord { respond_to })
            .await
    }

    /// Cancel the node actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn call<T>(
        &self,
        make_message: impl FnOnce(oneshot::Sender<T>) -> NodeMessage,
    ) -> Result<T, FleetError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make_message(tx))
            .await
            .map_err(|e| FleetError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FleetError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `NodeActor` implementation.
pub struct NodeActor {
    /// Node identifier (the provisioning system's instance id).
    node_id: String,
    /// Current lifecycle state.
    state: NodeState,
    /// Currently attached sessions.
    usage_count: u32,
    /// Launch request timestamp (epoch millis).
    created_at: i64,
    /// Most recent registration/deregistration timestamp (epoch millis).
    last_usage_change_at: i64,
    /// Wall timestamp of the drop to zero usage, if idle.
    idle_since: Option<i64>,
    /// Failed termination attempts so far.
    termination_attempts: u32,
    /// Monotonic idle deadline; `None` means disarmed. A single slot, so two
    /// live deadlines for one node cannot exist.
    idle_deadline: Option<Instant>,
    /// Monotonic deadline for the next termination re-request.
    termination_retry_at: Option<Instant>,
    /// Message receiver.
    receiver: mpsc::Receiver<NodeMessage>,
    /// Cancellation token (child of the supervisor's token).
    cancel_token: CancellationToken,
    /// Provisioning side-effect sink.
    gateway: Arc<dyn ProvisioningGateway>,
    /// Idle grace period.
    grace_period: Duration,
    /// Termination re-requests allowed after a failure.
    termination_max_retries: u32,
    /// Backoff between termination re-requests.
    termination_retry_backoff: Duration,
    /// Shared status cell for lock-free predicate reads.
    status: Arc<NodeStatusCell>,
    /// Shared fleet metrics.
    metrics: Arc<FleetMetrics>,
}

impl NodeActor {
    /// Spawn a new node actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        node_id: String,
        initial_state: NodeState,
        cancel_token: CancellationToken,
        gateway: Arc<dyn ProvisioningGateway>,
        config: &FleetConfig,
        metrics: Arc<FleetMetrics>,
    ) -> (NodeActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(NODE_CHANNEL_BUFFER);
        let status = Arc::new(NodeStatusCell::new(initial_state));
        let now_millis = chrono::Utc::now().timestamp_millis();

        let actor = Self {
            node_id: node_id.clone(),
            state: initial_state,
            usage_count: 0,
            created_at: now_millis,
            last_usage_change_at: now_millis,
            idle_since: None,
            termination_attempts: 0,
            idle_deadline: None,
            termination_retry_at: None,
            receiver,
            cancel_token: cancel_token.clone(),
            gateway,
            grace_period: config.idle_grace_period(),
            termination_max_retries: config.termination_max_retries,
            termination_retry_backoff: config.termination_retry_backoff(),
            status: Arc::clone(&status),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = NodeActorHandle {
            node_id,
            sender,
            cancel_token,
            status,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "fleet.actor.node", fields(node_id = %self.node_id))]
    async fn run(mut self) {
        debug!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            state = %self.state,
            "NodeActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "fleet.actor.node",
                        node_id = %self.node_id,
                        "NodeActor received cancellation signal"
                    );
                    break;
                }

                () = maybe_deadline(self.idle_deadline), if self.idle_deadline.is_some() => {
                    self.handle_grace_elapsed().await;
                }

                () = maybe_deadline(self.termination_retry_at), if self.termination_retry_at.is_some() => {
                    self.handle_termination_retry().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "fleet.actor.node",
                                node_id = %self.node_id,
                                "NodeActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            state = %self.state,
            "NodeActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: NodeMessage) {
        match message {
            NodeMessage::RegisterUsage {
                time_of_connection,
                respond_to,
            } => {
                let result = self.handle_register(time_of_connection);
                let _ = respond_to.send(result);
            }

            NodeMessage::DeregisterUsage {
                time_of_disconnection,
                respond_to,
            } => {
                let result = self.handle_deregister(time_of_disconnection);
                let _ = respond_to.send(result);
            }

            NodeMessage::ConfirmAvailable { respond_to } => {
                let result = self.handle_confirm_available();
                let _ = respond_to.send(result);
            }

            NodeMessage::AbortLaunch { respond_to } => {
                let result = self.handle_abort_launch();
                let _ = respond_to.send(result);
            }

            NodeMessage::DropIdle { respond_to } => {
                let result = self.handle_drop_idle().await;
                let _ = respond_to.send(result);
            }

            NodeMessage::ConfirmTerminated { respond_to } => {
                let result = self.handle_confirm_terminated();
                let _ = respond_to.send(result);
            }

            NodeMessage::TerminationFailed { respond_to } => {
                let result = self.handle_termination_failed();
                let _ = respond_to.send(result);
            }

            NodeMessage::GetRecord { respond_to } => {
                let _ = respond_to.send(self.record());
            }
        }
    }

    /// Handle a session attachment.
    fn handle_register(&mut self, time_of_connection: i64) -> Result<(), FleetError> {
        match self.state {
            NodeState::Launching => {
                // An attachment proves the node is reachable; promote before
                // counting so usage never exists on an unconfirmed node.
                self.state = self.state.apply(NodeEvent::ProvisioningConfirmed)?;
                info!(
                    target: "fleet.actor.node",
                    node_id = %self.node_id,
                    "Session attached before availability confirmation, node marked running"
                );
            }
            NodeState::WaitingIdleToTerminate => {
                self.state = self.state.apply(NodeEvent::UsageResumed)?;
                self.idle_deadline = None;
                debug!(
                    target: "fleet.actor.node",
                    node_id = %self.node_id,
                    "Idle countdown canceled by new registration"
                );
            }
            NodeState::Running => {}
            NodeState::Terminating | NodeState::Canceled => {
                self.metrics.record_rejected_registration();
                return Err(FleetError::InvalidStateTransition {
                    from: self.state,
                    event: NodeEvent::UsageResumed,
                });
            }
        }

        self.usage_count += 1;
        self.last_usage_change_at = time_of_connection;
        self.idle_since = None;
        self.publish();
        self.metrics.record_registration();

        debug!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            usage_count = self.usage_count,
            "Session registered"
        );

        Ok(())
    }

    /// Handle a session detachment.
    fn handle_deregister(&mut self, time_of_disconnection: i64) -> Result<(), FleetError> {
        if self.usage_count == 0 {
            self.metrics.record_usage_underflow();
            warn!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                "Deregistration without matching registration ignored"
            );
            return Err(FleetError::UsageUnderflow(self.node_id.clone()));
        }

        if self.usage_count == 1 {
            // Validate the drain transition before touching the counter so a
            // rejected event leaves the record untouched.
            let next = self.state.apply(NodeEvent::Drained)?;
            self.state = next;
            self.usage_count = 0;
            self.last_usage_change_at = time_of_disconnection;
            self.idle_since = Some(time_of_disconnection);
            self.idle_deadline = Some(Instant::now() + self.grace_period);

            info!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                grace_period_secs = self.grace_period.as_secs(),
                "Node drained, idle countdown armed"
            );
        } else {
            self.usage_count -= 1;
            self.last_usage_change_at = time_of_disconnection;
        }

        self.publish();
        self.metrics.record_deregistration();
        Ok(())
    }

    /// Gateway confirmed availability.
    fn handle_confirm_available(&mut self) -> Result<(), FleetError> {
        self.state = self.state.apply(NodeEvent::ProvisioningConfirmed)?;
        self.publish();
        info!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            "Provisioning confirmed, node running"
        );
        Ok(())
    }

    /// Gateway aborted or failed the launch.
    fn handle_abort_launch(&mut self) -> Result<(), FleetError> {
        self.state = self.state.apply(NodeEvent::ProvisioningAborted)?;
        self.idle_deadline = None;
        self.termination_retry_at = None;
        self.publish();
        info!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            "Launch aborted, node canceled"
        );
        Ok(())
    }

    /// Explicit idle-drop request. A no-op unless the node is waiting idle.
    async fn handle_drop_idle(&mut self) -> Result<DropIdleOutcome, FleetError> {
        if !self.state.is_waiting_idle_to_terminate() {
            debug!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                state = %self.state,
                "Drop request ignored, node not waiting idle"
            );
            return Ok(DropIdleOutcome::Ignored);
        }

        self.state = self.state.apply(NodeEvent::DropRequested)?;
        self.idle_deadline = None;
        self.publish();
        self.metrics.record_node_reaped();
        info!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            "Idle node dropped, requesting termination"
        );

        self.request_termination().await;
        Ok(DropIdleOutcome::Dropped)
    }

    /// Gateway confirmed termination. The registry removes the record; the
    /// state value itself does not change.
    fn handle_confirm_terminated(&mut self) -> Result<(), FleetError> {
        self.state = self.state.apply(NodeEvent::TerminationConfirmed)?;
        self.termination_retry_at = None;
        info!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            "Termination confirmed"
        );
        Ok(())
    }

    /// Gateway reported a failed termination attempt.
    fn handle_termination_failed(&mut self) -> Result<(), FleetError> {
        if !self.state.is_terminating() {
            warn!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                state = %self.state,
                "Stale termination failure report discarded"
            );
            return Ok(());
        }

        self.metrics.record_provisioning_failure();
        self.schedule_termination_retry();
        Ok(())
    }

    /// The idle grace period elapsed without new usage.
    async fn handle_grace_elapsed(&mut self) {
        self.idle_deadline = None;

        // A registration that won the race has already left the waiting
        // state; a stale fire is discarded.
        if !self.state.is_waiting_idle_to_terminate() {
            debug!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                state = %self.state,
                "Stale idle deadline discarded"
            );
            return;
        }

        match self.state.apply(NodeEvent::GraceElapsed) {
            Ok(next) => self.state = next,
            Err(e) => {
                // Unreachable given the guard above; logged rather than
                // silently coerced.
                error!(
                    target: "fleet.actor.node",
                    node_id = %self.node_id,
                    error = %e,
                    "Grace elapse rejected by state machine"
                );
                return;
            }
        }

        self.publish();
        self.metrics.record_node_reaped();
        info!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            "Idle grace period elapsed, requesting termination"
        );

        self.request_termination().await;
    }

    /// A scheduled termination re-request came due.
    async fn handle_termination_retry(&mut self) {
        self.termination_retry_at = None;

        if !self.state.is_terminating() {
            return;
        }

        info!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            attempt = self.termination_attempts + 1,
            "Retrying termination request"
        );
        self.request_termination().await;
    }

    /// Issue a termination request; a gateway refusal schedules a retry.
    async fn request_termination(&mut self) {
        self.metrics.record_termination_requested();

        if let Err(e) = self.gateway.request_termination(&self.node_id).await {
            warn!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                error = %e,
                "Termination request failed"
            );
            self.metrics.record_provisioning_failure();
            self.schedule_termination_retry();
        }
    }

    /// Schedule the next termination re-request, or escalate once the retry
    /// bound is exhausted.
    fn schedule_termination_retry(&mut self) {
        self.termination_attempts += 1;

        if self.termination_attempts > self.termination_max_retries {
            error!(
                target: "fleet.actor.node",
                node_id = %self.node_id,
                attempts = self.termination_attempts,
                "Termination retries exhausted, operator intervention required"
            );
            self.termination_retry_at = None;
            return;
        }

        self.termination_retry_at = Some(Instant::now() + self.termination_retry_backoff);
        warn!(
            target: "fleet.actor.node",
            node_id = %self.node_id,
            attempt = self.termination_attempts,
            backoff_secs = self.termination_retry_backoff.as_secs(),
            "Termination re-request scheduled"
        );
    }

    fn publish(&self) {
        self.status.publish(self.state, self.usage_count);
    }

    fn record(&self) -> NodeRecord {
        NodeRecord {
            id: self.node_id.clone(),
            state: self.state,
            usage_count: self.usage_count,
            created_at: self.created_at,
            last_usage_change_at: self.last_usage_change_at,
            idle_since: self.idle_since,
            termination_attempts: self.termination_attempts,
        }
    }
}

/// Sleep until the given deadline; pends forever when disarmed. Always used
/// behind a `select!` precondition, so the pending arm is never polled alone.
async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
