//! Common error types for Skyline fleet components.
//!
//! Contract violations (invalid transitions, usage underflow) are surfaced to
//! the immediate caller and never corrupt registry state. Provisioning errors
//! are recoverable; nothing in this subsystem escalates to a process crash.

use crate::types::{NodeEvent, NodeState};
use thiserror::Error;

/// Fleet lifecycle error type.
#[derive(Debug, Error)]
pub enum FleetError {
    /// An event arrived that is not valid for the node's current state.
    /// The operation is rejected and the registry is unchanged.
    #[error("Invalid state transition: {event} not valid in state {from}")]
    InvalidStateTransition {
        /// State the node was in when the event arrived.
        from: NodeState,
        /// The rejected event.
        event: NodeEvent,
    },

    /// Deregistration without a matching registration. Reported and ignored;
    /// the usage counter stays at zero.
    #[error("Usage underflow on media node {0}")]
    UsageUnderflow(String),

    /// Operation referenced a node id absent from the registry.
    #[error("Media node not found: {0}")]
    NodeNotFound(String),

    /// The provisioning gateway reported a launch or termination failure.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// The fleet manager is shutting down and rejects new registrations.
    #[error("Fleet manager is draining")]
    Draining,

    /// Internal error (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Whether this error is a caller contract violation (as opposed to an
    /// infrastructure failure). Contract violations indicate a stale routing
    /// decision or caller bug, not a degraded fleet.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            FleetError::InvalidStateTransition { .. }
                | FleetError::UsageUnderflow(_)
                | FleetError::NodeNotFound(_)
        )
    }
}

/// Result type alias using `FleetError`
pub type Result<T> = std::result::Result<T, FleetError>;
