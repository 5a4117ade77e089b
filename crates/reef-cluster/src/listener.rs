//! Forwarding of membership changes.

use std::sync::Arc;

use reef_types::{ClusterEvent, NodeId};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::ClusterState;

/// A component that reacts to cluster membership changes.
pub trait NodeChangeListener: Send + Sync {
    /// A node joined the cluster.
    fn node_added(&self, node: NodeId);

    /// A node left the cluster.
    fn node_removed(&self, node: NodeId);

    /// A node switched roles.
    fn node_switched(&self, node: NodeId);
}

/// Forward every event published by `cluster` to `listener`.
///
/// Runs until the cluster state is dropped. The subscription is taken
/// before this function returns, so no event published afterwards is
/// missed.
pub fn watch_membership(
    cluster: &ClusterState,
    listener: Arc<dyn NodeChangeListener>,
) -> JoinHandle<()> {
    let mut rx = cluster.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ClusterEvent::NodeAdded(node)) => listener.node_added(node),
                Ok(ClusterEvent::NodeRemoved(node)) => listener.node_removed(node),
                Ok(ClusterEvent::NodeSwitched(node)) => listener.node_switched(node),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "membership watcher lagged, events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("membership watcher stopped");
    })
}
