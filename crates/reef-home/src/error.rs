//! Error types for the authority.

use reef_types::LineId;

/// Errors returned by [`HomeNode::receive`](crate::HomeNode::receive).
///
/// An error means no reply was sent for the message.
#[derive(Debug, thiserror::Error)]
pub enum HomeError {
    /// The durable store failed; any open transaction was aborted.
    #[error("store error: {0}")]
    Store(#[from] reef_store::StoreError),

    /// The configured retry limit was hit while racing for a line.
    #[error("gave up on line {line} after {attempts} lost races")]
    ContentionExhausted {
        /// Contended line.
        line: LineId,
        /// Number of lost compare-and-swap rounds.
        attempts: u32,
    },

    /// The authority has not been started yet.
    #[error("authority is not ready")]
    NotReady,
}
