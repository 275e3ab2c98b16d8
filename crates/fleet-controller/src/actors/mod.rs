//! Actor model implementation for the fleet controller.
//!
//! ```text
//! FleetSupervisorActor (singleton per process)
//! ├── owns registry membership and launch decisions
//! └── supervises N NodeActors
//!     └── NodeActor (one per media node)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-node mailbox = per-node critical section**: registration,
//!   deregistration and the idle deadline all pass through one mailbox, so
//!   races resolve in arrival order and the loser observes updated state.
//! - **CancellationToken propagation**: the supervisor's root token parents
//!   every node actor token for graceful shutdown.
//! - **Message passing**: all inter-actor communication via
//!   `tokio::sync::mpsc` channels with `oneshot` responses.
//!
//! # Modules
//!
//! - [`supervisor`] - `FleetSupervisorActor` singleton
//! - [`node`] - `NodeActor` per media node, owns the lifecycle record
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Fleet counters shared across actors

pub mod messages;
pub mod metrics;
pub mod node;
pub mod supervisor;

// Re-export primary types
pub use messages::{DropIdleOutcome, FleetStatus, NodeRecord};
pub use metrics::{FleetMetrics, FleetMetricsSnapshot};
pub use node::{NodeActor, NodeActorHandle, NodeStatus, NodeStatusCell};
pub use supervisor::FleetSupervisorHandle;
