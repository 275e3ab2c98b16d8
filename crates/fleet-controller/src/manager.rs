//! Media node manager capability trait and implementations.
//!
//! Session-routing logic talks to the fleet exclusively through
//! [`MediaNodeManager`], so the real manager, the no-op manager and test
//! fakes interchange without touching callers. The no-op variant exists for
//! deployments that run a fixed fleet with no lifecycle management.

use crate::actors::messages::{FleetStatus, NodeRecord};
use crate::actors::metrics::FleetMetrics;
use crate::actors::node::NodeActorHandle;
use crate::actors::supervisor::FleetSupervisorHandle;
use crate::config::FleetConfig;
use crate::registry::MediaNodeRegistry;

use common::error::FleetError;
use common::gateway::ProvisioningGateway;
use common::types::{MediaNodeSnapshot, NodeState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Fleet operations consumed by session-routing logic.
///
/// Timestamps are wall-clock epoch millis supplied by the caller (the moment
/// the session event was observed). State predicates are pure snapshot reads
/// that reflect the state at the instant of the call; callers must tolerate
/// the state changing immediately after the read. Every predicate returns
/// `false` for an unknown node id.
#[async_trait::async_trait]
pub trait MediaNodeManager: Send + Sync {
    /// Record a session attachment to `node_id` and re-run the autoscale
    /// decision with the updated fleet view.
    ///
    /// `existing_nodes` is the caller's snapshot of the rest of the fleet;
    /// it feeds the autoscale decision and is never mutated.
    ///
    /// # Errors
    ///
    /// - `FleetError::NodeNotFound` - the id is not in the registry
    /// - `FleetError::InvalidStateTransition` - the node cannot accept
    ///   sessions (terminating or canceled); pick a different node
    /// - `FleetError::Draining` - the manager is shutting down
    async fn media_node_usage_registration(
        &self,
        node_id: &str,
        time_of_connection: i64,
        existing_nodes: &[MediaNodeSnapshot],
    ) -> Result<(), FleetError>;

    /// Record a session detachment from `node_id`. Dropping to zero usage
    /// arms the idle-to-terminate countdown.
    ///
    /// # Errors
    ///
    /// - `FleetError::NodeNotFound` - the id is not in the registry
    /// - `FleetError::UsageUnderflow` - no matching registration; reported
    ///   and ignored, the record is unchanged
    async fn media_node_usage_deregistration(
        &self,
        node_id: &str,
        time_of_disconnection: i64,
    ) -> Result<(), FleetError>;

    /// Reclaim `node_id` immediately if it is waiting out its idle grace
    /// period. A no-op for any other state, including unknown ids.
    ///
    /// # Errors
    ///
    /// `FleetError::Internal` if the node actor cannot be reached.
    async fn drop_idle_media_node(&self, node_id: &str) -> Result<(), FleetError>;

    /// Whether the node's launch is requested but not yet confirmed.
    fn is_launching(&self, node_id: &str) -> bool;

    /// Whether the node's launch was aborted.
    fn is_canceled(&self, node_id: &str) -> bool;

    /// Whether the node is available for new sessions.
    fn is_running(&self, node_id: &str) -> bool;

    /// Whether the node's termination is requested.
    fn is_terminating(&self, node_id: &str) -> bool;

    /// Whether the node is waiting out its idle grace period.
    fn is_waiting_idle_to_terminate(&self, node_id: &str) -> bool;
}

/// The real fleet manager.
///
/// Owns the registry, the supervisor actor and the shared draining flag.
/// Created empty at startup; nodes enter through launch requests (autoscale
/// or explicit) and leave through confirmed terminations or aborted
/// launches.
pub struct FleetManager {
    registry: Arc<MediaNodeRegistry>,
    supervisor: FleetSupervisorHandle,
    draining: Arc<AtomicBool>,
    metrics: Arc<FleetMetrics>,
}

impl FleetManager {
    /// Create a manager with an empty registry and spawn its supervisor.
    #[must_use]
    pub fn new(config: FleetConfig, gateway: Arc<dyn ProvisioningGateway>) -> Self {
        let registry = Arc::new(MediaNodeRegistry::new());
        let draining = Arc::new(AtomicBool::new(false));
        let metrics = FleetMetrics::new();

        let supervisor = FleetSupervisorHandle::new(
            config,
            Arc::clone(&registry),
            gateway,
            Arc::clone(&draining),
            Arc::clone(&metrics),
        );

        Self {
            registry,
            supervisor,
            draining,
            metrics,
        }
    }

    /// Shared fleet metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<FleetMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Point-in-time view of every known node.
    #[must_use]
    pub fn fleet_snapshot(&self) -> Vec<MediaNodeSnapshot> {
        self.registry.snapshot()
    }

    /// Request a node launch through the supervisor (bootstrap or manual
    /// scale-up; the autoscale engine uses the same path).
    ///
    /// # Errors
    ///
    /// `FleetError::Provisioning` if the gateway refuses the request,
    /// `FleetError::Draining` during shutdown.
    pub async fn request_node_launch(&self) -> Result<String, FleetError> {
        self.supervisor.launch_node().await
    }

    /// Gateway confirmation that a launching node is available.
    ///
    /// # Errors
    ///
    /// `FleetError::NodeNotFound` or `FleetError::InvalidStateTransition`.
    pub async fn confirm_node_available(&self, node_id: &str) -> Result<(), FleetError> {
        self.node_handle(node_id)?.confirm_available().await
    }

    /// Gateway notification that a launch was aborted or failed. The record
    /// is canceled and removed; the next registration may trigger a fresh
    /// launch attempt.
    ///
    /// # Errors
    ///
    /// `FleetError::NodeNotFound` or `FleetError::InvalidStateTransition`.
    pub async fn abort_node_launch(&self, node_id: &str) -> Result<(), FleetError> {
        self.supervisor.abort_launch(node_id.to_string()).await
    }

    /// Gateway confirmation that a terminating node's compute instance is
    /// gone. Removes the record from the registry.
    ///
    /// # Errors
    ///
    /// `FleetError::NodeNotFound` or `FleetError::InvalidStateTransition`.
    pub async fn confirm_node_terminated(&self, node_id: &str) -> Result<(), FleetError> {
        self.supervisor.confirm_terminated(node_id.to_string()).await
    }

    /// Gateway report that a termination attempt failed. The node stays
    /// terminating and the request is retried a bounded number of times.
    ///
    /// # Errors
    ///
    /// `FleetError::NodeNotFound` if the id is unknown.
    pub async fn report_termination_failure(&self, node_id: &str) -> Result<(), FleetError> {
        self.node_handle(node_id)?.report_termination_failure().await
    }

    /// Full record snapshot for one node (operator surfaces and tests).
    ///
    /// # Errors
    ///
    /// `FleetError::NodeNotFound` if the id is unknown.
    pub async fn node_record(&self, node_id: &str) -> Result<NodeRecord, FleetError> {
        self.node_handle(node_id)?.record().await
    }

    /// Current fleet status summary.
    ///
    /// # Errors
    ///
    /// `FleetError::Internal` if the supervisor cannot be reached.
    pub async fn status(&self) -> Result<FleetStatus, FleetError> {
        self.supervisor.status().await
    }

    /// Begin graceful shutdown: reject new registrations and drain node
    /// actors (including in-flight idle timers).
    ///
    /// # Errors
    ///
    /// `FleetError::Internal` if the supervisor cannot be reached.
    pub async fn shutdown(&self) -> Result<(), FleetError> {
        self.supervisor.shutdown().await
    }

    fn node_handle(&self, node_id: &str) -> Result<NodeActorHandle, FleetError> {
        self.registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))
    }

    fn node_state(&self, node_id: &str) -> Option<NodeState> {
        self.registry.get(node_id).map(|handle| handle.status().state)
    }
}

#[async_trait::async_trait]
impl MediaNodeManager for FleetManager {
    #[instrument(skip_all, fields(node_id = %node_id))]
    async fn media_node_usage_registration(
        &self,
        node_id: &str,
        time_of_connection: i64,
        existing_nodes: &[MediaNodeSnapshot],
    ) -> Result<(), FleetError> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(FleetError::Draining);
        }

        let handle = self.node_handle(node_id)?;
        handle.register_usage(time_of_connection).await?;

        // Updated fleet view for the decision engine: the caller's view of
        // the rest of the fleet plus this node's post-increment row.
        let mut fleet_view: Vec<MediaNodeSnapshot> = existing_nodes
            .iter()
            .filter(|node| node.id != node_id)
            .cloned()
            .collect();
        fleet_view.push(handle.snapshot_row());

        let registry_count = self.registry.len();
        if fleet_view.len() != registry_count {
            debug!(
                target: "fleet.manager",
                caller_view = fleet_view.len(),
                registry = registry_count,
                "Caller fleet view diverges from registry"
            );
        }

        self.supervisor.evaluate_autoscale(fleet_view).await;
        Ok(())
    }

    #[instrument(skip_all, fields(node_id = %node_id))]
    async fn media_node_usage_deregistration(
        &self,
        node_id: &str,
        time_of_disconnection: i64,
    ) -> Result<(), FleetError> {
        self.node_handle(node_id)?
            .deregister_usage(time_of_disconnection)
            .await
    }

    #[instrument(skip_all, fields(node_id = %node_id))]
    async fn drop_idle_media_node(&self, node_id: &str) -> Result<(), FleetError> {
        match self.registry.get(node_id) {
            Some(handle) => {
                let _outcome = handle.drop_idle().await?;
                Ok(())
            }
            None => {
                debug!(
                    target: "fleet.manager",
                    node_id = %node_id,
                    "Drop request for unknown node ignored"
                );
                Ok(())
            }
        }
    }

    fn is_launching(&self, node_id: &str) -> bool {
        self.node_state(node_id)
            .is_some_and(|state| state.is_launching())
    }

    fn is_canceled(&self, node_id: &str) -> bool {
        self.node_state(node_id)
            .is_some_and(|state| state.is_canceled())
    }

    fn is_running(&self, node_id: &str) -> bool {
        self.node_state(node_id)
            .is_some_and(|state| state.is_running())
    }

    fn is_terminating(&self, node_id: &str) -> bool {
        self.node_state(node_id)
            .is_some_and(|state| state.is_terminating())
    }

    fn is_waiting_idle_to_terminate(&self, node_id: &str) -> bool {
        self.node_state(node_id)
            .is_some_and(|state| state.is_waiting_idle_to_terminate())
    }
}

/// No-op manager for deployments without fleet lifecycle management.
///
/// Accepts every usage event without tracking anything and reports every
/// node as running, so routing proceeds against a statically provisioned
/// fleet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMediaNodeManager;

impl NoopMediaNodeManager {
    /// Create a no-op manager.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl MediaNodeManager for NoopMediaNodeManager {
    async fn media_node_usage_registration(
        &self,
        _node_id: &str,
        _time_of_connection: i64,
        _existing_nodes: &[MediaNodeSnapshot],
    ) -> Result<(), FleetError> {
        Ok(())
    }

    async fn media_node_usage_deregistration(
        &self,
        _node_id: &str,
        _time_of_disconnection: i64,
    ) -> Result<(), FleetError> {
        Ok(())
    }

    async fn drop_idle_media_node(&self, _node_id: &str) -> Result<(), FleetError> {
        Ok(())
    }

    fn is_launching(&self, _node_id: &str) -> bool {
        false
    }

    fn is_canceled(&self, _node_id: &str) -> bool {
        false
    }

    fn is_running(&self, _node_id: &str) -> bool {
        true
    }

    fn is_terminating(&self, _node_id: &str) -> bool {
        false
    }

    fn is_waiting_idle_to_terminate(&self, _node_id: &str) -> bool {
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fleet_test_utils::MockProvisioningGateway;

    fn manager_with(gateway: Arc<MockProvisioningGateway>) -> FleetManager {
        FleetManager::new(FleetConfig::default(), gateway)
    }

    #[tokio::test]
    async fn test_registration_on_unknown_node_fails() {
        let manager = manager_with(MockProvisioningGateway::new());

        let result = manager
            .media_node_usage_registration("ghost", 1_000, &[])
            .await;
        assert!(matches!(result, Err(FleetError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_deregistration_on_unknown_node_fails() {
        let manager = manager_with(MockProvisioningGateway::new());

        let result = manager.media_node_usage_deregistration("ghost", 1_000).await;
        assert!(matches!(result, Err(FleetError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_predicates_false_for_unknown_node() {
        let manager = manager_with(MockProvisioningGateway::new());

        assert!(!manager.is_launching("ghost"));
        assert!(!manager.is_canceled("ghost"));
        assert!(!manager.is_running("ghost"));
        assert!(!manager.is_terminating("ghost"));
        assert!(!manager.is_waiting_idle_to_terminate("ghost"));
    }

    #[tokio::test]
    async fn test_predicates_track_lifecycle() {
        let manager = manager_with(MockProvisioningGateway::new());

        let node_id = manager.request_node_launch().await.unwrap();
        assert!(manager.is_launching(&node_id));
        assert!(!manager.is_running(&node_id));

        manager.confirm_node_available(&node_id).await.unwrap();
        assert!(manager.is_running(&node_id));
        assert!(!manager.is_launching(&node_id));
    }

    #[tokio::test]
    async fn test_drop_idle_on_unknown_node_is_noop() {
        let manager = manager_with(MockProvisioningGateway::new());
        assert!(manager.drop_idle_media_node("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn test_registration_rejected_while_draining() {
        let manager = manager_with(MockProvisioningGateway::new());
        let node_id = manager.request_node_launch().await.unwrap();
        manager.confirm_node_available(&node_id).await.unwrap();

        manager.shutdown().await.unwrap();

        let result = manager
            .media_node_usage_registration(&node_id, 1_000, &[])
            .await;
        assert!(matches!(result, Err(FleetError::Draining)));
    }

    #[tokio::test]
    async fn test_noop_manager_accepts_everything() {
        let manager = NoopMediaNodeManager::new();

        assert!(manager
            .media_node_usage_registration("any", 1_000, &[])
            .await
            .is_ok());
        assert!(manager
            .media_node_usage_deregistration("any", 2_000)
            .await
            .is_ok());
        assert!(manager.drop_idle_media_node("any").await.is_ok());

        assert!(manager.is_running("any"));
        assert!(!manager.is_launching("any"));
        assert!(!manager.is_canceled("any"));
        assert!(!manager.is_terminating("any"));
        assert!(!manager.is_waiting_idle_to_terminate("any"));
    }

    #[tokio::test]
    async fn test_manager_is_object_safe() {
        // Real and no-op managers interchange behind the capability trait.
        let real = manager_with(MockProvisioningGateway::new());
        let managers: Vec<Box<dyn MediaNodeManager>> =
            vec![Box::new(real), Box::new(NoopMediaNodeManager::new())];

        for manager in &managers {
            assert!(!manager.is_terminating("ghost"));
        }
    }
}
