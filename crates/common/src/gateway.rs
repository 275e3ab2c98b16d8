//! Provisioning gateway capability trait.
//!
//! The gateway performs the actual compute launch/terminate side effects.
//! The fleet core only *requests* actions here; confirmation that a node is
//! available or gone arrives out of band and is fed back through the fleet
//! manager's lifecycle intake operations, never as a blocking call result.

use crate::error::FleetError;

/// Operations the fleet core requests from the provisioning system.
///
/// Implemented against the real cloud provisioner in deployment glue and by
/// `MockProvisioningGateway` in tests.
#[async_trait::async_trait]
pub trait ProvisioningGateway: Send + Sync {
    /// Request the launch of a new media node.
    ///
    /// Returns the provisioning system's instance identifier for the new
    /// node. The node is not yet usable; availability is confirmed later.
    ///
    /// # Errors
    ///
    /// `FleetError::Provisioning` if the launch request is not accepted.
    async fn request_launch(&self) -> Result<String, FleetError>;

    /// Request termination of a node's compute instance.
    ///
    /// # Errors
    ///
    /// `FleetError::Provisioning` if the termination request is not accepted.
    async fn request_termination(&self, node_id: &str) -> Result<(), FleetError>;
}
