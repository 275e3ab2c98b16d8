//! Fleet metrics.
//!
//! Shared between the actor system (which updates values) and callers that
//! read values for operator reporting. All fields are atomic for lock-free
//! concurrent access.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Aggregated counters for the fleet lifecycle subsystem.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    /// Successful usage registrations.
    registrations: AtomicU64,
    /// Successful usage deregistrations.
    deregistrations: AtomicU64,
    /// Registrations rejected because the node could not accept them.
    rejected_registrations: AtomicU64,
    /// Deregistrations without a matching registration.
    usage_underflows: AtomicU64,
    /// Launch requests issued to the provisioning gateway.
    launches_requested: AtomicU64,
    /// Termination requests issued to the provisioning gateway.
    terminations_requested: AtomicU64,
    /// Nodes that left the waiting state toward termination (grace expiry or
    /// explicit drop).
    nodes_reaped: AtomicU64,
    /// Launch or termination requests the gateway failed to accept.
    provisioning_failures: AtomicU64,
    /// Node actor panics (indicates bugs).
    actor_panics: AtomicU64,
    /// Nodes currently tracked by the registry.
    active_nodes: AtomicUsize,
}

/// Snapshot of fleet metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetMetricsSnapshot {
    pub registrations: u64,
    pub deregistrations: u64,
    pub rejected_registrations: u64,
    pub usage_underflows: u64,
    pub launches_requested: u64,
    pub terminations_requested: u64,
    pub nodes_reaped: u64,
    pub provisioning_failures: u64,
    pub actor_panics: u64,
    pub active_nodes: usize,
}

impl FleetMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deregistration(&self) {
        self.deregistrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_registration(&self) {
        self.rejected_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_usage_underflow(&self) {
        self.usage_underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch_requested(&self) {
        self.launches_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_termination_requested(&self) {
        self.terminations_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_reaped(&self) {
        self.nodes_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provisioning_failure(&self) {
        self.provisioning_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actor_panic(&self) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the tracked-node gauge.
    pub fn node_created(&self) {
        self.active_nodes.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the tracked-node gauge.
    pub fn node_removed(&self) {
        self.active_nodes.fetch_sub(1, Ordering::Relaxed);
    }

    /// Nodes currently tracked by the registry.
    #[must_use]
    pub fn active_nodes(&self) -> usize {
        self.active_nodes.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> FleetMetricsSnapshot {
        FleetMetricsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            deregistrations: self.deregistrations.load(Ordering::Relaxed),
            rejected_registrations: self.rejected_registrations.load(Ordering::Relaxed),
            usage_underflows: self.usage_underflows.load(Ordering::Relaxed),
            launches_requested: self.launches_requested.load(Ordering::Relaxed),
            terminations_requested: self.terminations_requested.load(Ordering::Relaxed),
            nodes_reaped: self.nodes_reaped.load(Ordering::Relaxed),
            provisioning_failures: self.provisioning_failures.load(Ordering::Relaxed),
            actor_panics: self.actor_panics.load(Ordering::Relaxed),
            active_nodes: self.active_nodes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let metrics = FleetMetrics::new();

        metrics.record_registration();
        metrics.record_registration();
        metrics.record_deregistration();
        metrics.record_usage_underflow();
        metrics.record_launch_requested();
        metrics.record_termination_requested();
        metrics.record_node_reaped();
        metrics.record_provisioning_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.registrations, 2);
        assert_eq!(snapshot.deregistrations, 1);
        assert_eq!(snapshot.usage_underflows, 1);
        assert_eq!(snapshot.launches_requested, 1);
        assert_eq!(snapshot.terminations_requested, 1);
        assert_eq!(snapshot.nodes_reaped, 1);
        assert_eq!(snapshot.provisioning_failures, 1);
        assert_eq!(snapshot.actor_panics, 0);
    }

    #[test]
    fn test_active_node_gauge() {
        let metrics = FleetMetrics::new();

        metrics.node_created();
        metrics.node_created();
        assert_eq!(metrics.active_nodes(), 2);

        metrics.node_removed();
        assert_eq!(metrics.active_nodes(), 1);
    }
}
