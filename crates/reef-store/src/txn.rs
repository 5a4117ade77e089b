//! Scoped transaction handling.

use tracing::debug;

use crate::error::StoreError;
use crate::traits::{LineStore, Txn};

/// A transaction that is aborted when dropped unless committed.
///
/// Opened with [`TxnGuard::begin`]; mutations go through [`TxnGuard::txn`].
/// Returning early, propagating an error with `?`, or unwinding all release
/// the transaction through the store's `abort`.
pub struct TxnGuard<'a> {
    store: &'a dyn LineStore,
    txn: Option<Txn>,
}

impl<'a> TxnGuard<'a> {
    /// Open a transaction on `store`.
    pub fn begin(store: &'a dyn LineStore) -> Result<Self, StoreError> {
        let txn = store.begin_transaction()?;
        Ok(Self {
            store,
            txn: Some(txn),
        })
    }

    /// The open transaction handle.
    pub fn txn(&mut self) -> &mut Txn {
        self.txn
            .as_mut()
            .unwrap_or_else(|| unreachable!("transaction is only taken by commit or drop"))
    }

    /// Commit the transaction.
    ///
    /// The handle is consumed either way; if the commit fails nothing from
    /// the transaction is visible.
    pub fn commit(mut self) -> Result<(), StoreError> {
        match self.txn.take() {
            Some(txn) => self.store.commit(txn),
            None => Ok(()),
        }
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            debug!(txn = txn.id(), staged = txn.len(), "aborting transaction");
            self.store.abort(txn);
        }
    }
}
