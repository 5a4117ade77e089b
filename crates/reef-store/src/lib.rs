//! Durable line storage for the reef authority.
//!
//! This crate defines the [`LineStore`] trait, the contract the authority
//! relies on for linearizable ownership compare-and-swap and multi-line
//! transactions, along with its backends:
//!
//! - [`MemoryStore`]: in-memory storage backed by a `RwLock<BTreeMap>`.
//! - [`FjallStore`]: persistent storage in a Fjall keyspace.
//! - [`FaultyStore`]: a wrapper that injects failures, for tests.
//!
//! [`TxnGuard`] scopes a transaction so that it is aborted on every exit
//! path that does not explicitly commit it.

mod error;
mod faulty_store;
mod fjall_store;
mod memory_store;
mod traits;
mod txn;

pub use error::StoreError;
pub use faulty_store::FaultyStore;
pub use fjall_store::FjallStore;
pub use memory_store::MemoryStore;
pub use traits::{LineStore, Txn};
pub use txn::TxnGuard;
