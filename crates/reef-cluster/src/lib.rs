//! Cluster membership for the reef authority.
//!
//! This crate provides:
//!
//! - [`ClusterState`]: the membership view, the primary role flag and a
//!   broadcast channel of [`ClusterEvent`](reef_types::ClusterEvent)s.
//! - [`NodeChangeListener`] and [`watch_membership`]: forwarding of
//!   membership changes to interested components.
//! - [`IdAllocator`]: the cluster-wide allocator of ordinary line ids.

mod allocator;
mod error;
mod listener;
mod state;

pub use allocator::IdAllocator;
pub use error::ClusterError;
pub use listener::{NodeChangeListener, watch_membership};
pub use state::ClusterState;
