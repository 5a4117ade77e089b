//! The coherence authority ("home node") of a reef grid.
//!
//! [`HomeNode`] is the system of record for which node owns every line. It
//! receives protocol messages from a [`Transport`](reef_net::Transport),
//! resolves them against a [`LineStore`](reef_store::LineStore) using only
//! the store's per-line compare-and-swap and its transactions, and replies
//! through the same transport.
//!
//! Observability counters are fed through the [`AuthorityMonitor`] seam.

mod authority;
mod config;
mod error;
mod monitor;

pub use authority::HomeNode;
pub use config::HomeConfig;
pub use error::HomeError;
pub use monitor::{AuthorityMonitor, CountingMonitor, MonitorSnapshot, NoopMonitor};

#[cfg(test)]
mod tests;
