//! A [`LineStore`] wrapper that injects failures.
//!
//! `FaultyStore` wraps any `Arc<dyn LineStore>` and fails selected
//! operations on demand, so that abort and rollback paths can be exercised
//! deterministically.
//!
//! # Example
//!
//! ```ignore
//! let faulty = FaultyStore::new(inner)
//!     .fail_txn_write_at(3) // the third transactional write fails
//!     .fail_commit(true);
//! ```
//!
//! It can also run a hook right after a CAS installs a new owner, which lets
//! tests interleave other store operations into the middle of a request.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reef_types::{LineEntry, LineId, NodeId, Owner};

use crate::error::StoreError;
use crate::traits::{LineStore, Txn};

type CasHook = Box<dyn Fn(&dyn LineStore, LineId, Owner) + Send + Sync>;

/// A [`LineStore`] wrapper that fails selected operations.
///
/// Failures can be armed up front with the builder methods or toggled at
/// runtime with the `set_*` methods.
pub struct FaultyStore {
    inner: Arc<dyn LineStore>,
    /// 1-based index of the transactional write that fails; 0 disables.
    fail_txn_write_at: AtomicUsize,
    txn_writes: AtomicUsize,
    fail_commit: AtomicBool,
    fail_delete: AtomicBool,
    /// Probability in percent that a CAS spuriously reports a lost race.
    cas_loss_percent: u32,
    rng: Mutex<StdRng>,
    after_cas: Option<CasHook>,
}

impl FaultyStore {
    /// Wrap an existing store with no failures armed.
    pub fn new(inner: Arc<dyn LineStore>) -> Self {
        Self {
            inner,
            fail_txn_write_at: AtomicUsize::new(0),
            txn_writes: AtomicUsize::new(0),
            fail_commit: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            cas_loss_percent: 0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            after_cas: None,
        }
    }

    /// Fail the `n`-th transactional write (1-based) from now on.
    pub fn fail_txn_write_at(self, n: usize) -> Self {
        self.set_fail_txn_write_at(n);
        self
    }

    /// Fail every commit.
    pub fn fail_commit(self, fail: bool) -> Self {
        self.set_fail_commit(fail);
        self
    }

    /// Fail every transactional delete.
    pub fn fail_delete(self, fail: bool) -> Self {
        self.set_fail_delete(fail);
        self
    }

    /// Make a percentage of owner CAS calls report a spurious lost race by
    /// returning [`Owner::Authority`] without touching the line.
    pub fn cas_loss_percent(mut self, percent: u32) -> Self {
        self.cas_loss_percent = percent.min(100);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Run `hook` on the wrapped store after every CAS that leaves the line
    /// with the owner it asked for.
    pub fn after_cas(
        mut self,
        hook: impl Fn(&dyn LineStore, LineId, Owner) + Send + Sync + 'static,
    ) -> Self {
        self.after_cas = Some(Box::new(hook));
        self
    }

    /// Re-arm the transactional write failure; `0` disables it.
    pub fn set_fail_txn_write_at(&self, n: usize) {
        self.txn_writes.store(0, Ordering::SeqCst);
        self.fail_txn_write_at.store(n, Ordering::SeqCst);
    }

    /// Toggle commit failures.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Toggle delete failures.
    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    fn spurious_cas_loss(&self) -> Result<bool, StoreError> {
        if self.cas_loss_percent == 0 {
            return Ok(false);
        }
        let mut rng = self.rng.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(rng.random_range(0..100) < self.cas_loss_percent)
    }
}

impl LineStore for FaultyStore {
    fn cas_owner(&self, line: LineId, expected: Owner, new: Owner) -> Result<Owner, StoreError> {
        if self.spurious_cas_loss()? {
            return Ok(Owner::Authority);
        }
        let current = self.inner.cas_owner(line, expected, new)?;
        if current == new
            && let Some(hook) = &self.after_cas
        {
            hook(self.inner.as_ref(), line, new);
        }
        Ok(current)
    }

    fn initialize(&self, line: LineId, owner: Owner) -> Result<bool, StoreError> {
        self.inner.initialize(line, owner)
    }

    fn read(&self, line: LineId) -> Result<Option<LineEntry>, StoreError> {
        self.inner.read(line)
    }

    fn write(
        &self,
        line: LineId,
        entry: LineEntry,
        txn: Option<&mut Txn>,
    ) -> Result<(), StoreError> {
        if txn.is_some() {
            let n = self.txn_writes.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_txn_write_at.load(Ordering::SeqCst) {
                return Err(StoreError::Injected(format!(
                    "transactional write #{n} of line {line}"
                )));
            }
        }
        self.inner.write(line, entry, txn)
    }

    fn delete(&self, line: LineId, txn: &mut Txn) -> Result<(), StoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Injected(format!("delete of line {line}")));
        }
        self.inner.delete(line, txn)
    }

    fn remove_owner(&self, node: NodeId) -> Result<usize, StoreError> {
        self.inner.remove_owner(node)
    }

    fn begin_transaction(&self) -> Result<Txn, StoreError> {
        self.inner.begin_transaction()
    }

    fn commit(&self, txn: Txn) -> Result<(), StoreError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            let id = txn.id();
            self.inner.abort(txn);
            return Err(StoreError::Injected(format!("commit of transaction {id}")));
        }
        self.inner.commit(txn)
    }

    fn abort(&self, txn: Txn) {
        self.inner.abort(txn);
    }

    fn max_id(&self) -> Result<Option<LineId>, StoreError> {
        self.inner.max_id()
    }

    fn dump(&self) -> Result<Vec<(LineId, LineEntry)>, StoreError> {
        self.inner.dump()
    }

    fn close(&self) -> Result<(), StoreError> {
        self.inner.close()
    }
}
