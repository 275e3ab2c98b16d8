//! Fleet Controller Library
//!
//! This library provides the core functionality for the Skyline Fleet
//! Controller - the lifecycle manager for the media node fleet backing the
//! real-time communication platform:
//!
//! - Per-node lifecycle state machine and usage accounting
//! - Idle reaping with a configurable grace period
//! - Autoscale decisions after every registration event
//! - Pluggable `MediaNodeManager` capability trait (real and no-op variants)
//!
//! # Architecture
//!
//! The fleet uses an actor model hierarchy:
//!
//! ```text
//! FleetSupervisorActor (singleton per process)
//! ├── owns the MediaNodeRegistry (insertion and removal of records)
//! ├── runs the AutoscaleDecisionEngine after registrations
//! └── supervises N NodeActors
//!     └── NodeActor (one per media node)
//!         ├── owns the node's lifecycle state and usage count
//!         └── arms/cancels the idle-to-terminate countdown
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-node serialization**: every read-modify-write of a node's state
//!   goes through that node's actor mailbox, so registration and a firing
//!   idle deadline can never interleave partially. Distinct node ids never
//!   block one another.
//! - **Non-blocking predicates**: each node handle carries an atomic status
//!   cell published by its actor; `is_running` and friends are plain atomic
//!   reads that never touch a mailbox or hold a lock across caller logic.
//! - **Asynchronous provisioning**: launch/terminate are requests to the
//!   `ProvisioningGateway`; confirmations arrive out of band through the
//!   fleet manager's intake operations.
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation (node + supervisor)
//! - [`autoscale`] - Spare-capacity scale-up policy
//! - [`config`] - Deployment-tunable parameters from environment
//! - [`manager`] - `MediaNodeManager` capability trait and implementations
//! - [`registry`] - Directory of known nodes and their status cells

pub mod actors;
pub mod autoscale;
pub mod config;
pub mod manager;
pub mod registry;

pub use common::error::FleetError;
pub use common::gateway::ProvisioningGateway;
pub use common::types::{MediaNodeSnapshot, NodeEvent, NodeState};
