//! Media node lifecycle state machine and fleet snapshot types.
//!
//! A media node is always in exactly one [`NodeState`]. Transitions are
//! driven by [`NodeEvent`]s through [`NodeState::apply`]; any pairing not in
//! the transition table is rejected with `InvalidStateTransition`. The state
//! machine never coerces an unexpected event.
//!
//! ```text
//! LAUNCHING ──provisioning confirmed──► RUNNING
//! LAUNCHING ──provisioning aborted────► CANCELED            (removed)
//! RUNNING ────usage reaches zero──────► WAITING_IDLE_TO_TERMINATE
//! WAITING ────new registration────────► RUNNING
//! WAITING ────grace elapsed / drop────► TERMINATING
//! TERMINATING ─termination confirmed──► (removed)
//! ```

use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a media node. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Launch requested; the compute instance is not yet available.
    Launching,
    /// Available and accepting session attachments.
    Running,
    /// Usage dropped to zero; the idle grace countdown is armed.
    WaitingIdleToTerminate,
    /// Termination requested from the provisioning gateway.
    Terminating,
    /// Launch aborted before the node ever became available.
    Canceled,
}

/// Event driving a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Gateway confirmed the node is available.
    ProvisioningConfirmed,
    /// Gateway aborted or failed the launch.
    ProvisioningAborted,
    /// Usage count reached zero.
    Drained,
    /// A registration arrived while idle.
    UsageResumed,
    /// The idle grace period elapsed with no new usage.
    GraceElapsed,
    /// Explicit caller request to reclaim an idle node.
    DropRequested,
    /// Gateway confirmed the compute instance is gone.
    TerminationConfirmed,
}

impl NodeState {
    /// Apply a lifecycle event, returning the successor state.
    ///
    /// `TerminationConfirmed` is accepted only in `Terminating` and leaves
    /// the state value unchanged; the registry removes the record rather
    /// than the node changing state. `Canceled` accepts no further events.
    ///
    /// # Errors
    ///
    /// `FleetError::InvalidStateTransition` for any pairing not in the table.
    pub fn apply(self, event: NodeEvent) -> Result<NodeState, FleetError> {
        match (self, event) {
            (NodeState::Launching, NodeEvent::ProvisioningConfirmed) => Ok(NodeState::Running),
            (NodeState::Launching, NodeEvent::ProvisioningAborted) => Ok(NodeState::Canceled),
            (NodeState::Running, NodeEvent::Drained) => Ok(NodeState::WaitingIdleToTerminate),
            (NodeState::WaitingIdleToTerminate, NodeEvent::UsageResumed) => Ok(NodeState::Running),
            (NodeState::WaitingIdleToTerminate, NodeEvent::GraceElapsed)
            | (NodeState::WaitingIdleToTerminate, NodeEvent::DropRequested) => {
                Ok(NodeState::Terminating)
            }
            (NodeState::Terminating, NodeEvent::TerminationConfirmed) => Ok(NodeState::Terminating),
            (from, event) => Err(FleetError::InvalidStateTransition { from, event }),
        }
    }

    /// State name as a stable string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NodeState::Launching => "launching",
            NodeState::Running => "running",
            NodeState::WaitingIdleToTerminate => "waiting_idle_to_terminate",
            NodeState::Terminating => "terminating",
            NodeState::Canceled => "canceled",
        }
    }

    /// Encode for storage in an atomic status cell.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            NodeState::Launching => 0,
            NodeState::Running => 1,
            NodeState::WaitingIdleToTerminate => 2,
            NodeState::Terminating => 3,
            NodeState::Canceled => 4,
        }
    }

    /// Decode from an atomic status cell. Total over `u8`; the only values
    /// ever stored come from [`NodeState::as_u8`].
    #[must_use]
    pub const fn from_u8(raw: u8) -> NodeState {
        match raw {
            0 => NodeState::Launching,
            1 => NodeState::Running,
            2 => NodeState::WaitingIdleToTerminate,
            3 => NodeState::Terminating,
            _ => NodeState::Canceled,
        }
    }

    #[must_use]
    pub const fn is_launching(&self) -> bool {
        matches!(self, NodeState::Launching)
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    #[must_use]
    pub const fn is_waiting_idle_to_terminate(&self) -> bool {
        matches!(self, NodeState::WaitingIdleToTerminate)
    }

    #[must_use]
    pub const fn is_terminating(&self) -> bool {
        matches!(self, NodeState::Terminating)
    }

    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, NodeState::Canceled)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeEvent::ProvisioningConfirmed => "provisioning_confirmed",
            NodeEvent::ProvisioningAborted => "provisioning_aborted",
            NodeEvent::Drained => "drained",
            NodeEvent::UsageResumed => "usage_resumed",
            NodeEvent::GraceElapsed => "grace_elapsed",
            NodeEvent::DropRequested => "drop_requested",
            NodeEvent::TerminationConfirmed => "termination_confirmed",
        };
        f.write_str(name)
    }
}

/// Read-only view of one media node, as exposed by registry snapshots and
/// consumed by the autoscale decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaNodeSnapshot {
    /// Stable node identifier (matches the provisioning system's instance id).
    pub id: String,
    /// Lifecycle state at the instant of the snapshot.
    pub state: NodeState,
    /// Number of sessions attached at the instant of the snapshot.
    pub usage_count: u32,
}

impl MediaNodeSnapshot {
    /// Build a snapshot row.
    #[must_use]
    pub fn new(id: impl Into<String>, state: NodeState, usage_count: u32) -> Self {
        Self {
            id: id.into(),
            state,
            usage_count,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL_STATES: [NodeState; 5] = [
        NodeState::Launching,
        NodeState::Running,
        NodeState::WaitingIdleToTerminate,
        NodeState::Terminating,
        NodeState::Canceled,
    ];

    const ALL_EVENTS: [NodeEvent; 7] = [
        NodeEvent::ProvisioningConfirmed,
        NodeEvent::ProvisioningAborted,
        NodeEvent::Drained,
        NodeEvent::UsageResumed,
        NodeEvent::GraceElapsed,
        NodeEvent::DropRequested,
        NodeEvent::TerminationConfirmed,
    ];

    #[test]
    fn test_valid_transitions() {
        assert_eq!(
            NodeState::Launching
                .apply(NodeEvent::ProvisioningConfirmed)
                .unwrap(),
            NodeState::Running
        );
        assert_eq!(
            NodeState::Launching
                .apply(NodeEvent::ProvisioningAborted)
                .unwrap(),
            NodeState::Canceled
        );
        assert_eq!(
            NodeState::Running.apply(NodeEvent::Drained).unwrap(),
            NodeState::WaitingIdleToTerminate
        );
        assert_eq!(
            NodeState::WaitingIdleToTerminate
                .apply(NodeEvent::UsageResumed)
                .unwrap(),
            NodeState::Running
        );
        assert_eq!(
            NodeState::WaitingIdleToTerminate
                .apply(NodeEvent::GraceElapsed)
                .unwrap(),
            NodeState::Terminating
        );
        assert_eq!(
            NodeState::WaitingIdleToTerminate
                .apply(NodeEvent::DropRequested)
                .unwrap(),
            NodeState::Terminating
        );
        assert_eq!(
            NodeState::Terminating
                .apply(NodeEvent::TerminationConfirmed)
                .unwrap(),
            NodeState::Terminating
        );
    }

    #[test]
    fn test_unlisted_transitions_rejected() {
        // Exactly 7 pairings are valid; the other 28 must be rejected with
        // the offending (state, event) pair echoed back.
        let mut valid = 0;
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                match state.apply(event) {
                    Ok(_) => valid += 1,
                    Err(FleetError::InvalidStateTransition { from, event: e }) => {
                        assert_eq!(from, state);
                        assert_eq!(e, event);
                    }
                    Err(other) => unreachable!("unexpected error kind: {other}"),
                }
            }
        }
        assert_eq!(valid, 7);
    }

    #[test]
    fn test_canceled_accepts_no_events() {
        for event in ALL_EVENTS {
            assert!(NodeState::Canceled.apply(event).is_err());
        }
    }

    #[test]
    fn test_predicates_mutually_exclusive_and_exhaustive() {
        for state in ALL_STATES {
            let hits = [
                state.is_launching(),
                state.is_running(),
                state.is_waiting_idle_to_terminate(),
                state.is_terminating(),
                state.is_canceled(),
            ]
            .iter()
            .filter(|&&hit| hit)
            .count();
            assert_eq!(hits, 1, "exactly one predicate must hold for {state}");
        }
    }

    #[test]
    fn test_atomic_encoding_round_trips() {
        for state in ALL_STATES {
            assert_eq!(NodeState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(NodeState::Launching.to_string(), "launching");
        assert_eq!(
            NodeState::WaitingIdleToTerminate.to_string(),
            "waiting_idle_to_terminate"
        );
        assert_eq!(NodeEvent::GraceElapsed.to_string(), "grace_elapsed");
    }

    #[test]
    fn test_snapshot_serializes_state_as_snake_case() {
        let snapshot = MediaNodeSnapshot::new("node-1", NodeState::WaitingIdleToTerminate, 0);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "waiting_idle_to_terminate");
        assert_eq!(json["usage_count"], 0);
    }
}
