//! Error types for the cluster crate.

use reef_types::NodeId;

/// Errors produced by membership operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The node is not a member of the cluster.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The authority's own id cannot be used for a cluster member.
    #[error("node id {0} is reserved for the authority")]
    ReservedNodeId(NodeId),
}
