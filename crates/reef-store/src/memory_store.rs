//! In-memory line storage backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use reef_types::{LineEntry, LineId, NodeId, Owner};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{LineStore, Txn, TxnOp, check_versions};

/// In-memory line store backed by a `RwLock<BTreeMap>`.
///
/// Useful for tests and for authorities configured to run without
/// persistence. Every mutation takes the write lock, which makes
/// [`LineStore::cas_owner`] and [`LineStore::commit`] atomic.
pub struct MemoryStore {
    lines: RwLock<BTreeMap<LineId, LineEntry>>,
    next_txn: AtomicU64,
    open_txns: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            lines: RwLock::new(BTreeMap::new()),
            next_txn: AtomicU64::new(1),
            open_txns: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of transactions begun but not yet committed or aborted.
    pub fn open_transactions(&self) -> usize {
        self.open_txns.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn read_lines(&self) -> Result<RwLockReadGuard<'_, BTreeMap<LineId, LineEntry>>, StoreError> {
        self.check_open()?;
        self.lines.read().map_err(|_| StoreError::Poisoned)
    }

    fn write_lines(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<LineId, LineEntry>>, StoreError> {
        self.check_open()?;
        self.lines.write().map_err(|_| StoreError::Poisoned)
    }

    fn finish_txn(&self) {
        self.open_txns.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LineStore for MemoryStore {
    fn cas_owner(&self, line: LineId, expected: Owner, new: Owner) -> Result<Owner, StoreError> {
        let mut map = self.write_lines()?;
        let current = map.get(&line).map_or(Owner::Unowned, |e| e.owner);
        if current != expected {
            return Ok(current);
        }
        match map.get_mut(&line) {
            Some(entry) => entry.owner = new,
            None => {
                map.insert(line, LineEntry::new(new, 0, Vec::new()));
            }
        }
        Ok(new)
    }

    fn initialize(&self, line: LineId, owner: Owner) -> Result<bool, StoreError> {
        let mut map = self.write_lines()?;
        match map.get_mut(&line) {
            Some(entry) if entry.owner == owner && entry.version == 0 => {
                entry.version = 1;
                entry.data.clear();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn read(&self, line: LineId) -> Result<Option<LineEntry>, StoreError> {
        Ok(self.read_lines()?.get(&line).cloned())
    }

    fn write(
        &self,
        line: LineId,
        entry: LineEntry,
        txn: Option<&mut Txn>,
    ) -> Result<(), StoreError> {
        match txn {
            Some(txn) => {
                self.check_open()?;
                txn.push(TxnOp::Write(line, entry));
            }
            None => {
                self.write_lines()?.insert(line, entry);
            }
        }
        Ok(())
    }

    fn delete(&self, line: LineId, txn: &mut Txn) -> Result<(), StoreError> {
        self.check_open()?;
        txn.push(TxnOp::Delete(line));
        Ok(())
    }

    fn remove_owner(&self, node: NodeId) -> Result<usize, StoreError> {
        let mut map = self.write_lines()?;
        let owner = Owner::Node(node);
        let mut reassigned = 0;
        for entry in map.values_mut().filter(|e| e.owner == owner) {
            entry.owner = Owner::Authority;
            reassigned += 1;
        }
        debug!(%node, reassigned, "reassigned lines to authority");
        Ok(reassigned)
    }

    fn begin_transaction(&self) -> Result<Txn, StoreError> {
        self.check_open()?;
        self.open_txns.fetch_add(1, Ordering::SeqCst);
        Ok(Txn::new(self.next_txn.fetch_add(1, Ordering::SeqCst)))
    }

    fn commit(&self, txn: Txn) -> Result<(), StoreError> {
        self.finish_txn();
        let mut map = self.write_lines()?;
        let ops = txn.into_ops();
        check_versions(&ops, |line| Ok(map.get(&line).map(|e| e.version)))?;
        for op in ops {
            match op {
                TxnOp::Write(line, entry) => {
                    map.insert(line, entry);
                }
                TxnOp::Delete(line) => {
                    map.remove(&line);
                }
            }
        }
        Ok(())
    }

    fn abort(&self, txn: Txn) {
        self.finish_txn();
        debug!(txn = txn.id(), "discarded transaction");
    }

    fn max_id(&self) -> Result<Option<LineId>, StoreError> {
        Ok(self.read_lines()?.keys().next_back().copied())
    }

    fn dump(&self) -> Result<Vec<(LineId, LineEntry)>, StoreError> {
        Ok(self
            .read_lines()?
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
