//! Error types for line storage operations.

use reef_types::LineId;

/// Errors that can occur during line storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The storage engine reported an error.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// A failure injected by [`FaultyStore`](crate::FaultyStore).
    #[error("injected failure: {0}")]
    Injected(String),

    /// A transaction would lower the stored version of a line.
    #[error("version regression on line {line}: stored {stored}, offered {offered}")]
    VersionRegression {
        line: LineId,
        stored: u64,
        offered: u64,
    },

    /// A stored key is not a valid line id.
    #[error("corrupt key in line keyspace: {0:02x?}")]
    CorruptKey(Vec<u8>),

    /// A lock guarding the store was poisoned by a panicking thread.
    #[error("store lock poisoned")]
    Poisoned,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}
