//! Media node registry.
//!
//! Durable-in-memory directory of all known nodes; the single source of
//! truth for fleet membership. The map lock is held only for map access,
//! never across an `.await`; per-node mutation atomicity comes from each
//! node's actor mailbox, not from this lock. State-query reads therefore
//! never wait on a long operation.
//!
//! Membership changes (insert on launch, remove after a confirmed
//! termination or finalized cancellation) belong to the supervisor alone.

use crate::actors::node::NodeActorHandle;
use common::types::MediaNodeSnapshot;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Directory of known media nodes keyed by node id.
#[derive(Default)]
pub struct MediaNodeRegistry {
    inner: RwLock<HashMap<String, NodeActorHandle>>,
}

impl MediaNodeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node handle. Returns a clone; the caller talks to the node
    /// actor without holding the map lock.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<NodeActorHandle> {
        self.read_map().get(node_id).cloned()
    }

    /// Insert or replace the record for a node id.
    pub fn upsert(&self, handle: NodeActorHandle) {
        let node_id = handle.node_id().to_string();
        if let Some(previous) = self.write_map().insert(node_id, handle) {
            // Identity must never be reused for a different physical node;
            // replacing a live record indicates a provisioning id collision.
            tracing::warn!(
                target: "fleet.registry",
                node_id = %previous.node_id(),
                "Replaced a live registry record"
            );
            previous.cancel();
        }
    }

    /// Remove a node's record, returning its handle if present.
    pub fn remove(&self, node_id: &str) -> Option<NodeActorHandle> {
        self.write_map().remove(node_id)
    }

    /// Whether a record exists for the node id.
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.read_map().contains_key(node_id)
    }

    /// Number of known nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Point-in-time view of every known node. Ordering carries no meaning.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MediaNodeSnapshot> {
        self.read_map()
            .values()
            .map(NodeActorHandle::snapshot_row)
            .collect()
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<String, NodeActorHandle>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<String, NodeActorHandle>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
