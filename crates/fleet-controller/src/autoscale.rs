//! Autoscale decision engine.
//!
//! Evaluated after every successful registration with the updated fleet
//! view. Policy: aggregate spare capacity across running and launching nodes
//! must stay at or above a configured floor; falling below it requests one
//! new node. A node already launching absorbs the demand spike, so no second
//! launch is requested until it resolves.

use crate::config::FleetConfig;
use common::types::{MediaNodeSnapshot, NodeState};

/// Outcome of a scale-up evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Capacity is sufficient (or a launch is already outstanding).
    Hold {
        /// Aggregate spare session capacity at evaluation time.
        spare_capacity: u64,
    },
    /// Spare capacity fell below the threshold; launch one node.
    LaunchNew {
        /// Aggregate spare session capacity at evaluation time.
        spare_capacity: u64,
    },
}

/// Spare-capacity scale-up policy.
#[derive(Debug, Clone, Copy)]
pub struct AutoscaleDecisionEngine {
    /// Session capacity of a single node.
    sessions_per_node: u32,
    /// Spare-capacity floor, in sessions.
    spare_capacity_threshold: u32,
}

impl AutoscaleDecisionEngine {
    /// Build the engine from fleet configuration.
    #[must_use]
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            sessions_per_node: config.sessions_per_node,
            spare_capacity_threshold: config.spare_capacity_threshold,
        }
    }

    /// Evaluate the fleet view.
    ///
    /// Spare capacity counts running nodes at `capacity - usage` and
    /// launching nodes at full capacity. Waiting, terminating and canceled
    /// nodes contribute nothing; they are on their way out.
    #[must_use]
    pub fn evaluate(&self, fleet: &[MediaNodeSnapshot]) -> ScaleDecision {
        let mut spare_capacity: u64 = 0;
        let mut launch_outstanding = false;

        for node in fleet {
            match node.state {
                NodeState::Launching => {
                    launch_outstanding = true;
                    spare_capacity += u64::from(self.sessions_per_node);
                }
                NodeState::Running => {
                    spare_capacity +=
                        u64::from(self.sessions_per_node.saturating_sub(node.usage_count));
                }
                NodeState::WaitingIdleToTerminate
                | NodeState::Terminating
                | NodeState::Canceled => {}
            }
        }

        if launch_outstanding || spare_capacity >= u64::from(self.spare_capacity_threshold) {
            ScaleDecision::Hold { spare_capacity }
        } else {
            ScaleDecision::LaunchNew { spare_capacity }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn engine(sessions_per_node: u32, spare_capacity_threshold: u32) -> AutoscaleDecisionEngine {
        AutoscaleDecisionEngine {
            sessions_per_node,
            spare_capacity_threshold,
        }
    }

    fn node(id: &str, state: NodeState, usage: u32) -> MediaNodeSnapshot {
        MediaNodeSnapshot::new(id, state, usage)
    }

    #[test]
    fn test_ample_spare_capacity_holds() {
        let decision = engine(100, 20).evaluate(&[node("n1", NodeState::Running, 10)]);
        assert_eq!(
            decision,
            ScaleDecision::Hold {
                spare_capacity: 90
            }
        );
    }

    #[test]
    fn test_below_threshold_launches() {
        let decision = engine(100, 20).evaluate(&[node("n1", NodeState::Running, 95)]);
        assert_eq!(decision, ScaleDecision::LaunchNew { spare_capacity: 5 });
    }

    #[test]
    fn test_threshold_boundary_holds() {
        // Spare exactly at the floor does not trigger a launch.
        let decision = engine(100, 20).evaluate(&[node("n1", NodeState::Running, 80)]);
        assert_eq!(
            decision,
            ScaleDecision::Hold {
                spare_capacity: 20
            }
        );
    }

    #[test]
    fn test_launching_node_suppresses_second_launch() {
        let decision = engine(100, 20).evaluate(&[
            node("n1", NodeState::Running, 100),
            node("n2", NodeState::Launching, 0),
        ]);
        assert_eq!(
            decision,
            ScaleDecision::Hold {
                spare_capacity: 100
            }
        );
    }

    #[test]
    fn test_spare_aggregates_across_running_nodes() {
        let decision = engine(100, 30).evaluate(&[
            node("n1", NodeState::Running, 90),
            node("n2", NodeState::Running, 85),
        ]);
        assert_eq!(
            decision,
            ScaleDecision::Hold {
                spare_capacity: 25
            }
        );
        // Same fleet against a lower threshold still holds; against a higher
        // usage it launches.
        let decision = engine(100, 30).evaluate(&[
            node("n1", NodeState::Running, 95),
            node("n2", NodeState::Running, 85),
        ]);
        assert_eq!(
            decision,
            ScaleDecision::LaunchNew {
                spare_capacity: 20
            }
        );
    }

    #[test]
    fn test_departing_nodes_contribute_nothing() {
        // Idle and terminating capacity must not mask a shortage.
        let decision = engine(100, 20).evaluate(&[
            node("n1", NodeState::Running, 95),
            node("n2", NodeState::WaitingIdleToTerminate, 0),
            node("n3", NodeState::Terminating, 0),
        ]);
        assert_eq!(decision, ScaleDecision::LaunchNew { spare_capacity: 5 });
    }

    #[test]
    fn test_usage_above_capacity_saturates() {
        let decision = engine(50, 10).evaluate(&[node("n1", NodeState::Running, 70)]);
        assert_eq!(decision, ScaleDecision::LaunchNew { spare_capacity: 0 });
    }

    #[test]
    fn test_empty_fleet_launches() {
        let decision = engine(100, 20).evaluate(&[]);
        assert_eq!(decision, ScaleDecision::LaunchNew { spare_capacity: 0 });
    }
}
