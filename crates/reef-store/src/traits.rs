//! Core trait and transaction handle for line storage.

use std::collections::BTreeMap;

use reef_types::{LineEntry, LineId, NodeId, Owner};

use crate::error::StoreError;

/// A mutation staged inside a [`Txn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TxnOp {
    Write(LineId, LineEntry),
    Delete(LineId),
}

/// An open store transaction.
///
/// Mutations are staged in the handle and become visible together when the
/// handle is passed to [`LineStore::commit`]. Passing it to
/// [`LineStore::abort`] (or dropping it) discards them. Prefer
/// [`TxnGuard`](crate::TxnGuard), which aborts automatically.
#[derive(Debug)]
pub struct Txn {
    id: u64,
    ops: Vec<TxnOp>,
}

impl Txn {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            ops: Vec::new(),
        }
    }

    /// Store-local identifier of this transaction.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of staged mutations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing has been staged yet.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn push(&mut self, op: TxnOp) {
        self.ops.push(op);
    }

    pub(crate) fn into_ops(self) -> Vec<TxnOp> {
        self.ops
    }
}

/// The durable store the authority keeps line state in.
///
/// Every call made outside a transaction is individually atomic; in
/// particular [`cas_owner`](LineStore::cas_owner) is linearizable per line,
/// which is the only coordination primitive the authority uses. Calls that
/// share a [`Txn`] commit or abort together.
pub trait LineStore: Send + Sync {
    /// Atomically replace the owner of `line` with `new` if it is currently
    /// `expected`, and return the owner after the call.
    ///
    /// A missing line has owner [`Owner::Unowned`]; swapping it away from
    /// `Unowned` creates the line with version 0 and no data. The caller
    /// detects success by comparing the returned owner against `new`.
    fn cas_owner(&self, line: LineId, expected: Owner, new: Owner) -> Result<Owner, StoreError>;

    /// Atomically move a freshly created line (version 0) held by `owner`
    /// to version 1 with no data.
    ///
    /// Returns `false` without touching the line if it is missing, held by
    /// anyone else or already past version 0.
    fn initialize(&self, line: LineId, owner: Owner) -> Result<bool, StoreError>;

    /// Read the stored entry for `line`, if it exists.
    fn read(&self, line: LineId) -> Result<Option<LineEntry>, StoreError>;

    /// Write `entry` for `line`: immediately when `txn` is `None`, otherwise
    /// staged in the transaction.
    ///
    /// An immediate write replaces the entry unconditionally. A staged write
    /// must not lower the stored version; see [`commit`](LineStore::commit).
    fn write(&self, line: LineId, entry: LineEntry, txn: Option<&mut Txn>)
    -> Result<(), StoreError>;

    /// Stage the removal of `line` in `txn`.
    fn delete(&self, line: LineId, txn: &mut Txn) -> Result<(), StoreError>;

    /// Set the owner of every line held by `node` to [`Owner::Authority`].
    ///
    /// Returns the number of lines reassigned.
    fn remove_owner(&self, node: NodeId) -> Result<usize, StoreError>;

    /// Open a new transaction.
    fn begin_transaction(&self) -> Result<Txn, StoreError>;

    /// Apply every mutation staged in `txn` atomically.
    ///
    /// Fails with [`StoreError::VersionRegression`] if a staged write carries
    /// a lower version than the line holds at that point of the
    /// transaction. On error nothing from the transaction is visible.
    fn commit(&self, txn: Txn) -> Result<(), StoreError>;

    /// Discard every mutation staged in `txn`.
    fn abort(&self, txn: Txn);

    /// Highest existing line id, or `None` if the store is empty.
    fn max_id(&self) -> Result<Option<LineId>, StoreError>;

    /// All stored lines in id order.
    fn dump(&self) -> Result<Vec<(LineId, LineEntry)>, StoreError>;

    /// Close the store. Later calls fail with [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}

/// Reject `ops` if any write would lower a line's version.
///
/// `stored` looks up the committed version of a line. Earlier operations of
/// the same transaction are taken into account, so a write following a
/// delete of the same line is unconstrained.
pub(crate) fn check_versions(
    ops: &[TxnOp],
    mut stored: impl FnMut(LineId) -> Result<Option<u64>, StoreError>,
) -> Result<(), StoreError> {
    let mut staged: BTreeMap<LineId, Option<u64>> = BTreeMap::new();
    for op in ops {
        match op {
            TxnOp::Write(line, entry) => {
                let current = match staged.get(line) {
                    Some(v) => *v,
                    None => stored(*line)?,
                };
                if let Some(current) = current.filter(|&v| entry.version < v) {
                    return Err(StoreError::VersionRegression {
                        line: *line,
                        stored: current,
                        offered: entry.version,
                    });
                }
                staged.insert(*line, Some(entry.version));
            }
            TxnOp::Delete(line) => {
                staged.insert(*line, None);
            }
        }
    }
    Ok(())
}
