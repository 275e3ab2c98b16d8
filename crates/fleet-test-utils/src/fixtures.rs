//! Pre-configured fleet snapshot rows for tests.

use common::types::{MediaNodeSnapshot, NodeState};

/// A running node hosting `usage_count` sessions.
#[must_use]
pub fn running_node(id: &str, usage_count: u32) -> MediaNodeSnapshot {
    MediaNodeSnapshot::new(id, NodeState::Running, usage_count)
}

/// A node whose launch has been requested but not confirmed.
#[must_use]
pub fn launching_node(id: &str) -> MediaNodeSnapshot {
    MediaNodeSnapshot::new(id, NodeState::Launching, 0)
}

/// An empty node waiting out its idle grace period.
#[must_use]
pub fn waiting_idle_node(id: &str) -> MediaNodeSnapshot {
    MediaNodeSnapshot::new(id, NodeState::WaitingIdleToTerminate, 0)
}

/// A node with termination requested.
#[must_use]
pub fn terminating_node(id: &str) -> MediaNodeSnapshot {
    MediaNodeSnapshot::new(id, NodeState::Terminating, 0)
}

/// A random node id in the provisioning system's format.
#[must_use]
pub fn random_node_id() -> String {
    format!("node-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_states() {
        assert_eq!(running_node("n", 3).state, NodeState::Running);
        assert_eq!(running_node("n", 3).usage_count, 3);
        assert_eq!(launching_node("n").state, NodeState::Launching);
        assert_eq!(
            waiting_idle_node("n").state,
            NodeState::WaitingIdleToTerminate
        );
        assert_eq!(terminating_node("n").state, NodeState::Terminating);
    }

    #[test]
    fn test_random_node_ids_unique() {
        assert_ne!(random_node_id(), random_node_id());
    }
}
