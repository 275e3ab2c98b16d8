//! Mock provisioning gateway.
//!
//! Records every launch/termination request and can be scripted to refuse
//! them, so tests can drive provisioning-failure paths deterministically.

use common::error::FleetError;
use common::gateway::ProvisioningGateway;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock provisioning gateway for unit and integration tests.
///
/// Mints sequential node ids (`node-0001`, `node-0002`, ...) so tests stay
/// deterministic.
pub struct MockProvisioningGateway {
    /// Ids handed out by `request_launch`, in order.
    launched: Mutex<Vec<String>>,
    /// Ids passed to `request_termination`, in order.
    terminated: Mutex<Vec<String>>,
    /// Number of launch requests made (including refused ones).
    launch_calls: AtomicUsize,
    /// Number of termination requests made (including refused ones).
    termination_calls: AtomicUsize,
    /// Whether launch requests are refused.
    fail_launches: AtomicBool,
    /// Whether termination requests are refused.
    fail_terminations: AtomicBool,
    /// Sequence counter for minted ids.
    next_id: AtomicUsize,
    /// Prefix for minted ids.
    id_prefix: String,
}

impl MockProvisioningGateway {
    /// Create a shared gateway that accepts every request.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_prefix("node")
    }

    /// Create a shared gateway minting ids with a custom prefix.
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            launched: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            launch_calls: AtomicUsize::new(0),
            termination_calls: AtomicUsize::new(0),
            fail_launches: AtomicBool::new(false),
            fail_terminations: AtomicBool::new(false),
            next_id: AtomicUsize::new(0),
            id_prefix: prefix.to_string(),
        })
    }

    /// Script launch requests to be refused.
    pub fn set_fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Script termination requests to be refused.
    pub fn set_fail_terminations(&self, fail: bool) {
        self.fail_terminations.store(fail, Ordering::SeqCst);
    }

    /// Ids handed out so far.
    #[must_use]
    pub fn launched_ids(&self) -> Vec<String> {
        self.launched.lock().expect("mock lock poisoned").clone()
    }

    /// Ids whose termination was requested so far.
    #[must_use]
    pub fn terminated_ids(&self) -> Vec<String> {
        self.terminated.lock().expect("mock lock poisoned").clone()
    }

    /// Number of launch requests made.
    #[must_use]
    pub fn launch_call_count(&self) -> usize {
        self.launch_calls.load(Ordering::SeqCst)
    }

    /// Number of termination requests made.
    #[must_use]
    pub fn termination_call_count(&self) -> usize {
        self.termination_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProvisioningGateway for MockProvisioningGateway {
    async fn request_launch(&self) -> Result<String, FleetError> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(FleetError::Provisioning(
                "mock launch refused".to_string(),
            ));
        }

        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let node_id = format!("{}-{sequence:04}", self.id_prefix);
        self.launched
            .lock()
            .expect("mock lock poisoned")
            .push(node_id.clone());
        Ok(node_id)
    }

    async fn request_termination(&self, node_id: &str) -> Result<(), FleetError> {
        self.termination_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_terminations.load(Ordering::SeqCst) {
            return Err(FleetError::Provisioning(
                "mock termination refused".to_string(),
            ));
        }

        self.terminated
            .lock()
            .expect("mock lock poisoned")
            .push(node_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mints_sequential_ids() {
        let gateway = MockProvisioningGateway::new();

        let first = gateway.request_launch().await.unwrap();
        let second = gateway.request_launch().await.unwrap();

        assert_eq!(first, "node-0001");
        assert_eq!(second, "node-0002");
        assert_eq!(gateway.launched_ids(), vec![first, second]);
        assert_eq!(gateway.launch_call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let gateway = MockProvisioningGateway::new();
        gateway.set_fail_launches(true);
        gateway.set_fail_terminations(true);

        assert!(gateway.request_launch().await.is_err());
        assert!(gateway.request_termination("node-1").await.is_err());
        assert!(gateway.launched_ids().is_empty());
        assert!(gateway.terminated_ids().is_empty());
        assert_eq!(gateway.launch_call_count(), 1);
        assert_eq!(gateway.termination_call_count(), 1);

        gateway.set_fail_launches(false);
        assert!(gateway.request_launch().await.is_ok());
    }

    #[tokio::test]
    async fn test_records_terminations() {
        let gateway = MockProvisioningGateway::new();

        gateway.request_termination("node-7").await.unwrap();
        assert_eq!(gateway.terminated_ids(), vec!["node-7".to_string()]);
    }
}
