//! Error types for network operations.

use reef_types::NodeId;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The destination node is not connected (left the cluster or never
    /// joined). Callers treat this as non-fatal.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// An I/O error on a connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// A frame exceeded the maximum allowed size.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}
