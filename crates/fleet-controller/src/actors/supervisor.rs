//! `FleetSupervisorActor` - singleton supervisor for node actors.
//!
//! The supervisor is the top-level actor in the fleet hierarchy:
//!
//! - Singleton per process
//! - Owns record insertion into and removal from the `MediaNodeRegistry`
//! - Runs the autoscale decision after every registration
//! - Issues launch requests to the provisioning gateway
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! Serializing launch decisions through the supervisor mailbox is what keeps
//! at most one launching node outstanding: two registrations racing past the
//! spare-capacity threshold produce one launch, not two.

use super::messages::{FleetStatus, SupervisorMessage};
use super::metrics::FleetMetrics;
use super::node::NodeActor;
use crate::autoscale::{AutoscaleDecisionEngine, ScaleDecision};
use crate::config::FleetConfig;
use crate::registry::MediaNodeRegistry;

use common::error::FleetError;
use common::gateway::ProvisioningGateway;
use common::types::{MediaNodeSnapshot, NodeState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the supervisor mailbox.
const SUPERVISOR_CHANNEL_BUFFER: usize = 256;

/// Timeout for a removed node actor's task to wind down.
const NODE_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout per node actor during graceful shutdown.
const SHUTDOWN_NODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `FleetSupervisorActor`.
#[derive(Clone)]
pub struct FleetSupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    cancel_token: CancellationToken,
}

impl FleetSupervisorHandle {
    /// Create a new `FleetSupervisorActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        config: FleetConfig,
        registry: Arc<MediaNodeRegistry>,
        gateway: Arc<dyn ProvisioningGateway>,
        draining: Arc<AtomicBool>,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(SUPERVISOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = FleetSupervisorActor {
            receiver,
            cancel_token: cancel_token.clone(),
            registry,
            gateway,
            engine: AutoscaleDecisionEngine::from_config(&config),
            config,
            draining,
            metrics,
            node_tasks: HashMap::new(),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Enqueue an autoscale evaluation. Fire-and-forget: registration calls
    /// must not block on provisioning requests.
    pub async fn evaluate_autoscale(&self, fleet_view: Vec<MediaNodeSnapshot>) {
        let _ = self
            .sender
            .send(SupervisorMessage::EvaluateAutoscale { fleet_view })
            .await;
    }

    /// Request a new node launch and insert its launching record.
    pub async fn launch_node(&self) -> Result<String, FleetError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::LaunchNode { respond_to: tx })
            .await
            .map_err(|e| FleetError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FleetError::Internal(format!("response receive failed: {e}")))?
    }

    /// Finalize a gateway-confirmed termination and remove the record.
    pub async fn confirm_terminated(&self, node_id: String) -> Result<(), FleetError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::ConfirmTerminated {
                node_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| FleetError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FleetError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel an aborted launch and remove the record.
    pub async fn abort_launch(&self, node_id: String) -> Result<(), FleetError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::AbortLaunch {
                node_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| FleetError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FleetError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current fleet status summary.
    pub async fn status(&self) -> Result<FleetStatus, FleetError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| FleetError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FleetError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown and wait for it to begin.
    pub async fn shutdown(&self) -> Result<(), FleetError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| FleetError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| FleetError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the supervisor and all node actors immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the supervisor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `FleetSupervisorActor` implementation.
struct FleetSupervisorActor {
    /// Message receiver.
    receiver: mpsc::Receiver<SupervisorMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Directory of known nodes; the supervisor alone mutates membership.
    registry: Arc<MediaNodeRegistry>,
    /// Provisioning side-effect sink.
    gateway: Arc<dyn ProvisioningGateway>,
    /// Scale-up policy.
    engine: AutoscaleDecisionEngine,
    /// Fleet configuration (forwarded to node actors).
    config: FleetConfig,
    /// Shared draining flag; set during shutdown so registration calls are
    /// rejected without a mailbox round trip.
    draining: Arc<AtomicBool>,
    /// Shared fleet metrics.
    metrics: Arc<FleetMetrics>,
    /// Join handles of supervised node actors.
    node_tasks: HashMap<String, JoinHandle<()>>,
}

impl FleetSupervisorActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "fleet.actor.supervisor")]
    async fn run(mut self) {
        info!(
            target: "fleet.actor.supervisor",
            "FleetSupervisorActor started"
        );

        loop {
            // Reap node actor tasks that finished unexpectedly
            self.check_node_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "fleet.actor.supervisor",
                        "FleetSupervisorActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "fleet.actor.supervisor",
                                "FleetSupervisorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "fleet.actor.supervisor",
            nodes_remaining = self.node_tasks.len(),
            "FleetSupervisorActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::EvaluateAutoscale { fleet_view } => {
                self.handle_evaluate_autoscale(&fleet_view).await;
            }

            SupervisorMessage::LaunchNode { respond_to } => {
                let result = self.launch_node().await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::ConfirmTerminated {
                node_id,
                respond_to,
            } => {
                let result = self.handle_confirm_terminated(&node_id).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::AbortLaunch {
                node_id,
                respond_to,
            } => {
                let result = self.handle_abort_launch(&node_id).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            SupervisorMessage::Shutdown { respond_to } => {
                self.initiate_shutdown();
                let _ = respond_to.send(());
            }
        }
    }

    /// Re-run the autoscale decision with the post-registration fleet view.
    async fn handle_evaluate_autoscale(&mut self, fleet_view: &[MediaNodeSnapshot]) {
        if self.draining.load(Ordering::SeqCst) {
            return;
        }

        // The registry is authoritative for the one-launch-outstanding rule,
        // whatever view the caller supplied.
        if self
            .registry
            .snapshot()
            .iter()
            .any(|node| node.state.is_launching())
        {
            debug!(
                target: "fleet.autoscale",
                "Launch already outstanding, holding"
            );
            return;
        }

        match self.engine.evaluate(fleet_view) {
            ScaleDecision::Hold { spare_capacity } => {
                debug!(
                    target: "fleet.autoscale",
                    spare_capacity,
                    "Spare capacity sufficient, holding"
                );
            }
            ScaleDecision::LaunchNew { spare_capacity } => {
                info!(
                    target: "fleet.autoscale",
                    spare_capacity,
                    threshold = self.config.spare_capacity_threshold,
                    "Spare capacity below threshold, requesting node launch"
                );
                if let Err(e) = self.launch_node().await {
                    warn!(
                        target: "fleet.autoscale",
                        error = %e,
                        "Launch request failed, will re-evaluate on next registration"
                    );
                }
            }
        }
    }

    /// Request a launch from the gateway and insert the launching record.
    async fn launch_node(&mut self) -> Result<String, FleetError> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(FleetError::Draining);
        }

        self.metrics.record_launch_requested();
        let node_id = match self.gateway.request_launch().await {
            Ok(node_id) => node_id,
            Err(e) => {
                self.metrics.record_provisioning_failure();
                return Err(e);
            }
        };

        if self.registry.get(&node_id).is_some() {
            // Identity is never reused for a different physical node.
            return Err(FleetError::Internal(format!(
                "gateway returned an id already present in the registry: {node_id}"
            )));
        }

        let (handle, task_handle) = NodeActor::spawn(
            node_id.clone(),
            NodeState::Launching,
            self.cancel_token.child_token(),
            Arc::clone(&self.gateway),
            &self.config,
            Arc::clone(&self.metrics),
        );

        self.registry.upsert(handle);
        self.node_tasks.insert(node_id.clone(), task_handle);
        self.metrics.node_created();

        info!(
            target: "fleet.actor.supervisor",
            node_id = %node_id,
            total_nodes = self.registry.len(),
            "Node launch requested, launching record inserted"
        );

        Ok(node_id)
    }

    /// Finalize a confirmed termination: validate, then remove the record.
    async fn handle_confirm_terminated(&mut self, node_id: &str) -> Result<(), FleetError> {
        let handle = self
            .registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;

        handle.confirm_terminated().await?;
        self.remove_node(node_id);

        info!(
            target: "fleet.actor.supervisor",
            node_id = %node_id,
            total_nodes = self.registry.len(),
            "Terminated node removed from registry"
        );

        Ok(())
    }

    /// Finalize an aborted launch: validate, then remove the record.
    async fn handle_abort_launch(&mut self, node_id: &str) -> Result<(), FleetError> {
        let handle = self
            .registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;

        handle.abort_launch().await?;
        self.remove_node(node_id);

        info!(
            target: "fleet.actor.supervisor",
            node_id = %node_id,
            total_nodes = self.registry.len(),
            "Canceled node removed from registry"
        );

        Ok(())
    }

    /// Remove a node's record and wind down its actor.
    ///
    /// The actor task is awaited on a background task to avoid blocking the
    /// supervisor mailbox.
    fn remove_node(&mut self, node_id: &str) {
        if let Some(handle) = self.registry.remove(node_id) {
            handle.cancel();
            self.metrics.node_removed();
        }

        if let Some(task_handle) = self.node_tasks.remove(node_id) {
            let node_id_owned = node_id.to_string();
            tokio::spawn(async move {
                match tokio::time::timeout(NODE_CLEANUP_TIMEOUT, task_handle).await {
                    Ok(Ok(())) => {
                        debug!(
                            target: "fleet.actor.supervisor",
                            node_id = %node_id_owned,
                            "Node actor task completed cleanly"
                        );
                    }
                    Ok(Err(e)) => {
                        warn!(
                            target: "fleet.actor.supervisor",
                            node_id = %node_id_owned,
                            error = ?e,
                            "Node actor task panicked during removal"
                        );
                    }
                    Err(_) => {
                        warn!(
                            target: "fleet.actor.supervisor",
                            node_id = %node_id_owned,
                            "Node actor task cleanup timed out"
                        );
                    }
                }
            });
        }
    }

    /// Current fleet status summary.
    fn status(&self) -> FleetStatus {
        let snapshot = self.registry.snapshot();
        let mut status = FleetStatus {
            node_count: snapshot.len(),
            launching: 0,
            running: 0,
            waiting_idle: 0,
            terminating: 0,
            is_draining: self.draining.load(Ordering::SeqCst),
        };

        for node in &snapshot {
            match node.state {
                NodeState::Launching => status.launching += 1,
                NodeState::Running => status.running += 1,
                NodeState::WaitingIdleToTerminate => status.waiting_idle += 1,
                NodeState::Terminating => status.terminating += 1,
                NodeState::Canceled => {}
            }
        }

        status
    }

    /// Initiate graceful shutdown.
    fn initiate_shutdown(&mut self) {
        info!(
            target: "fleet.actor.supervisor",
            node_count = self.registry.len(),
            "Initiating graceful shutdown"
        );

        // Reject new registrations, then cancel the root token (propagates
        // to all node actors and drains their timers).
        self.draining.store(true, Ordering::SeqCst);
        self.cancel_token.cancel();
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "fleet.actor.supervisor",
            node_count = self.node_tasks.len(),
            "Performing graceful shutdown"
        );

        self.draining.store(true, Ordering::SeqCst);

        for task in self.node_tasks.drain() {
            let (node_id, task_handle) = task;
            match tokio::time::timeout(SHUTDOWN_NODE_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "fleet.actor.supervisor",
                        node_id = %node_id,
                        "Node actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "fleet.actor.supervisor",
                        node_id = %node_id,
                        error = ?e,
                        "Node actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "fleet.actor.supervisor",
                        node_id = %node_id,
                        "Node actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "fleet.actor.supervisor",
            "Graceful shutdown complete"
        );
    }

    /// Reap node actor tasks that finished without going through removal.
    async fn check_node_health(&mut self) {
        let mut finished = Vec::new();

        for (node_id, task_handle) in &self.node_tasks {
            if task_handle.is_finished() {
                finished.push(node_id.clone());
            }
        }

        for node_id in finished {
            if let Some(task_handle) = self.node_tasks.remove(&node_id) {
                match task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "fleet.actor.supervisor",
                            node_id = %node_id,
                            "Node actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "fleet.actor.supervisor",
                                node_id = %node_id,
                                error = ?join_error,
                                "Node actor panicked, dropping its record"
                            );
                            self.metrics.record_actor_panic();
                        }
                    }
                }

                // A dead actor cannot serve its record; drop it rather than
                // leave a zombie entry behind.
                if self.registry.remove(&node_id).is_some() {
                    self.metrics.node_removed();
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fleet_test_utils::MockProvisioningGateway;

    fn test_setup(
        gateway: Arc<MockProvisioningGateway>,
    ) -> (FleetSupervisorHandle, Arc<MediaNodeRegistry>) {
        let registry = Arc::new(MediaNodeRegistry::new());
        let handle = FleetSupervisorHandle::new(
            FleetConfig::default(),
            Arc::clone(&registry),
            gateway,
            Arc::new(AtomicBool::new(false)),
            FleetMetrics::new(),
        );
        (handle, registry)
    }

    #[tokio::test]
    async fn test_launch_node_inserts_launching_record() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, registry) = test_setup(Arc::clone(&gateway));

        let node_id = supervisor.launch_node().await.unwrap();

        assert_eq!(gateway.launch_call_count(), 1);
        let handle = registry.get(&node_id).expect("record should exist");
        assert_eq!(handle.status().state, NodeState::Launching);

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_launch_failure_surfaces_error() {
        let gateway = MockProvisioningGateway::new();
        gateway.set_fail_launches(true);
        let (supervisor, registry) = test_setup(Arc::clone(&gateway));

        let result = supervisor.launch_node().await;
        assert!(matches!(result, Err(FleetError::Provisioning(_))));
        assert!(registry.is_empty());

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_confirm_terminated_removes_record() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, registry) = test_setup(Arc::clone(&gateway));

        let node_id = supervisor.launch_node().await.unwrap();
        let handle = registry.get(&node_id).unwrap();
        handle.confirm_available().await.unwrap();

        // Drain the node into terminating via explicit drop.
        handle.register_usage(1_000).await.unwrap();
        handle.deregister_usage(2_000).await.unwrap();
        handle.drop_idle().await.unwrap();
        assert_eq!(handle.status().state, NodeState::Terminating);

        supervisor.confirm_terminated(node_id.clone()).await.unwrap();
        assert!(registry.get(&node_id).is_none());

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_confirm_terminated_unknown_node() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, _registry) = test_setup(gateway);

        let result = supervisor.confirm_terminated("ghost".to_string()).await;
        assert!(matches!(result, Err(FleetError::NodeNotFound(_))));

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_abort_launch_removes_record() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, registry) = test_setup(gateway);

        let node_id = supervisor.launch_node().await.unwrap();
        supervisor.abort_launch(node_id.clone()).await.unwrap();

        assert!(registry.get(&node_id).is_none());

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_abort_launch_rejected_for_running_node() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, registry) = test_setup(gateway);

        let node_id = supervisor.launch_node().await.unwrap();
        registry
            .get(&node_id)
            .unwrap()
            .confirm_available()
            .await
            .unwrap();

        let result = supervisor.abort_launch(node_id.clone()).await;
        assert!(matches!(
            result,
            Err(FleetError::InvalidStateTransition { .. })
        ));
        // The record survives a rejected abort.
        assert!(registry.get(&node_id).is_some());

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_autoscale_launches_below_threshold() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, registry) = test_setup(Arc::clone(&gateway));

        // Default config: capacity 100, threshold 20. One running node at
        // usage 95 leaves 5 spare.
        let fleet_view = vec![MediaNodeSnapshot::new("node-busy", NodeState::Running, 95)];
        supervisor.evaluate_autoscale(fleet_view).await;

        // Give the supervisor time to process and launch.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(gateway.launch_call_count(), 1);
        assert_eq!(registry.len(), 1);

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_autoscale_holds_when_launch_outstanding() {
        let gateway = MockProvisioningGateway::new();
        let (supervisor, registry) = test_setup(Arc::clone(&gateway));

        // Insert a launching node through the normal path.
        let _node_id = supervisor.launch_node().await.unwrap();
        assert_eq!(gateway.launch_call_count(), 1);

        // Even with zero spare capacity in the view, the outstanding launch
        // suppresses a second request.
        let fleet_view = vec![MediaNodeSnapshot::new("node-busy", NodeState::Running, 100)];
        supervisor.evaluate_autoscale(fleet_view).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(gateway.launch_call_count(), 1);
        assert_eq!(registry.len(), 1);

        supervisor.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_sets_draining_and_cancels() {
        let gateway = MockProvisioningGateway::new();
        let registry = Arc::new(MediaNodeRegistry::new());
        let draining = Arc::new(AtomicBool::new(false));
        let supervisor = FleetSupervisorHandle::new(
            FleetConfig::default(),
            Arc::clone(&registry),
            gateway,
            Arc::clone(&draining),
            FleetMetrics::new(),
        );

        supervisor.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(draining.load(Ordering::SeqCst));
        assert!(supervisor.is_cancelled());
    }
}
