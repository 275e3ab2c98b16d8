//! Message types for actor communication.

use common::error::FleetError;
use common::types::{MediaNodeSnapshot, NodeState};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages handled by a `NodeActor`.
#[derive(Debug)]
pub enum NodeMessage {
    /// A session attached to this node.
    RegisterUsage {
        /// Wall-clock timestamp of the attachment (epoch millis).
        time_of_connection: i64,
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// A session detached from this node.
    DeregisterUsage {
        /// Wall-clock timestamp of the detachment (epoch millis).
        time_of_disconnection: i64,
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// The provisioning gateway confirmed the node is available.
    ConfirmAvailable {
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// The provisioning gateway aborted or failed the launch.
    AbortLaunch {
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// Explicit request to reclaim the node if it is idle.
    DropIdle {
        respond_to: oneshot::Sender<Result<DropIdleOutcome, FleetError>>,
    },
    /// The provisioning gateway confirmed the compute instance is gone.
    ConfirmTerminated {
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// The provisioning gateway reported a failed termination attempt.
    TerminationFailed {
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// Full record snapshot for operator surfaces and tests.
    GetRecord {
        respond_to: oneshot::Sender<NodeRecord>,
    },
}

/// Result of an explicit idle-drop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropIdleOutcome {
    /// The node was waiting idle and is now terminating.
    Dropped,
    /// The node was not waiting idle; nothing changed.
    Ignored,
}

/// Full point-in-time view of one node's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Stable node identifier.
    pub id: String,
    /// Current lifecycle state.
    pub state: NodeState,
    /// Currently attached sessions.
    pub usage_count: u32,
    /// Launch request timestamp (epoch millis).
    pub created_at: i64,
    /// Timestamp of the most recent registration or deregistration
    /// (epoch millis).
    pub last_usage_change_at: i64,
    /// Set when usage first reached zero after being non-zero; cleared when
    /// usage becomes non-zero again (epoch millis).
    pub idle_since: Option<i64>,
    /// Failed termination attempts so far.
    pub termination_attempts: u32,
}

/// Messages handled by the `FleetSupervisorActor`.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Re-run the autoscale decision after a successful registration.
    EvaluateAutoscale {
        /// Updated fleet view (the caller's view of the rest of the fleet
        /// plus the freshly incremented target node).
        fleet_view: Vec<MediaNodeSnapshot>,
    },
    /// Request a new node launch (bootstrap or manual scale-up).
    LaunchNode {
        respond_to: oneshot::Sender<Result<String, FleetError>>,
    },
    /// Gateway confirmed a node's termination; finalize and remove it.
    ConfirmTerminated {
        node_id: String,
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// Gateway aborted a launch; cancel and remove the record.
    AbortLaunch {
        node_id: String,
        respond_to: oneshot::Sender<Result<(), FleetError>>,
    },
    /// Current fleet status summary.
    GetStatus {
        respond_to: oneshot::Sender<FleetStatus>,
    },
    /// Begin graceful shutdown: reject new registrations, drain timers.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Fleet-wide status summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FleetStatus {
    /// Nodes currently tracked by the registry.
    pub node_count: usize,
    /// Nodes in the launching state.
    pub launching: usize,
    /// Nodes in the running state.
    pub running: usize,
    /// Nodes waiting out the idle grace period.
    pub waiting_idle: usize,
    /// Nodes with termination requested.
    pub terminating: usize,
    /// Whether the supervisor is draining (rejecting new registrations).
    pub is_draining: bool,
}
