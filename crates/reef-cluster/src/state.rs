//! Cluster state: live membership view and the authority's role.
//!
//! [`ClusterState`] is the shared, read-mostly structure the authority and
//! the daemon use to learn who is in the cluster. Every change is published
//! on a broadcast channel; see [`crate::watch_membership`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reef_types::{ClusterEvent, NodeId};
use tokio::sync::{RwLock, broadcast};
use tracing::info;

use crate::allocator::IdAllocator;
use crate::error::ClusterError;

/// Capacity of the membership event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Shared cluster state.
pub struct ClusterState {
    /// Current members. Never contains [`NodeId::AUTHORITY`].
    members: RwLock<BTreeSet<NodeId>>,
    /// Whether this authority is the primary replica.
    primary: AtomicBool,
    /// Allocator for ordinary line ids.
    allocator: IdAllocator,
    event_tx: broadcast::Sender<ClusterEvent>,
}

impl ClusterState {
    /// Create an empty cluster view.
    pub fn new(primary: bool) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            members: RwLock::new(BTreeSet::new()),
            primary: AtomicBool::new(primary),
            allocator: IdAllocator::new(),
            event_tx,
        })
    }

    /// Subscribe to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.event_tx.subscribe()
    }

    /// Add a node to the cluster and broadcast [`ClusterEvent::NodeAdded`].
    ///
    /// Re-adding a current member is accepted and broadcast again.
    pub async fn add_member(&self, node: NodeId) -> Result<(), ClusterError> {
        if node.get() <= NodeId::AUTHORITY.get() {
            return Err(ClusterError::ReservedNodeId(node));
        }
        self.members.write().await.insert(node);

        info!(%node, "node joined cluster");
        let _ = self.event_tx.send(ClusterEvent::NodeAdded(node));
        Ok(())
    }

    /// Remove a node and broadcast [`ClusterEvent::NodeRemoved`].
    pub async fn remove_member(&self, node: NodeId) -> Result<(), ClusterError> {
        if !self.members.write().await.remove(&node) {
            return Err(ClusterError::NodeNotFound(node));
        }

        info!(%node, "node left cluster");
        let _ = self.event_tx.send(ClusterEvent::NodeRemoved(node));
        Ok(())
    }

    /// Record that a member switched roles and broadcast
    /// [`ClusterEvent::NodeSwitched`].
    pub async fn switch_member(&self, node: NodeId) -> Result<(), ClusterError> {
        if !self.members.read().await.contains(&node) {
            return Err(ClusterError::NodeNotFound(node));
        }

        info!(%node, "node switched role");
        let _ = self.event_tx.send(ClusterEvent::NodeSwitched(node));
        Ok(())
    }

    /// Current members in ascending id order.
    pub async fn members(&self) -> Vec<NodeId> {
        self.members.read().await.iter().copied().collect()
    }

    pub async fn is_member(&self, node: NodeId) -> bool {
        self.members.read().await.contains(&node)
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Whether this authority is the primary replica.
    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }

    /// Change the primary role flag.
    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }

    /// The cluster-wide line id allocator.
    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("primary", &self.is_primary())
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}
