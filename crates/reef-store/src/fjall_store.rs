//! Persistent line storage backed by Fjall.
//!
//! Lines live in a single `lines` keyspace: the key is the big-endian line
//! id (so iteration order matches numeric order) and the value is the
//! postcard-encoded [`LineEntry`].

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use reef_types::{LineEntry, LineId, NodeId, Owner};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::traits::{LineStore, Txn, TxnOp, check_versions};

type Result<T> = std::result::Result<T, StoreError>;

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Open Fjall handles; dropped by [`LineStore::close`].
struct Handles {
    db: Database,
    lines: Keyspace,
    /// Keeps a temporary directory alive for the lifetime of the store.
    _tmp: Option<tempfile::TempDir>,
}

/// Line store persisted in a Fjall database.
///
/// Mutations hold the write side of the handle lock, so an owner
/// compare-and-swap is a single read-modify-write that no other mutation
/// can interleave with. Transactions are applied with one Fjall write batch.
pub struct FjallStore {
    handles: RwLock<Option<Handles>>,
    next_txn: AtomicU64,
}

impl FjallStore {
    /// Open a persistent store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open().map_err(storage_err)?;
        Self::init(db, None)
    }

    /// Open a temporary store that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path())
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::init(db, Some(tmp))
    }

    fn init(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let lines = db
            .keyspace("lines", KeyspaceCreateOptions::default)
            .map_err(storage_err)?;
        Ok(Self {
            handles: RwLock::new(Some(Handles {
                db,
                lines,
                _tmp: tmp,
            })),
            next_txn: AtomicU64::new(1),
        })
    }

    fn read_handles(&self) -> Result<RwLockReadGuard<'_, Option<Handles>>> {
        let guard = self.handles.read().map_err(|_| StoreError::Poisoned)?;
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    fn check_open(&self) -> Result<()> {
        drop(self.read_handles()?);
        Ok(())
    }

    fn write_handles(&self) -> Result<RwLockWriteGuard<'_, Option<Handles>>> {
        let guard = self.handles.write().map_err(|_| StoreError::Poisoned)?;
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }
}

fn get_entry(lines: &Keyspace, line: LineId) -> Result<Option<LineEntry>> {
    match lines.get(line.to_key()).map_err(storage_err)? {
        Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

fn put_entry(lines: &Keyspace, line: LineId, entry: &LineEntry) -> Result<()> {
    let value = postcard::to_allocvec(entry)?;
    lines.insert(line.to_key(), value).map_err(storage_err)?;
    Ok(())
}

fn decode_pair(key: &[u8], value: &[u8]) -> Result<(LineId, LineEntry)> {
    let id = LineId::from_key(key).ok_or_else(|| StoreError::CorruptKey(key.to_vec()))?;
    Ok((id, postcard::from_bytes(value)?))
}

fn scan(lines: &Keyspace) -> Result<Vec<(LineId, LineEntry)>> {
    let mut out = Vec::new();
    for guard in lines.iter() {
        let (k, v) = guard.into_inner().map_err(storage_err)?;
        out.push(decode_pair(&k, &v)?);
    }
    Ok(out)
}

impl LineStore for FjallStore {
    fn cas_owner(&self, line: LineId, expected: Owner, new: Owner) -> Result<Owner> {
        let guard = self.write_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };

        let current = get_entry(&h.lines, line)?;
        let current_owner = current.as_ref().map_or(Owner::Unowned, |e| e.owner);
        if current_owner != expected {
            return Ok(current_owner);
        }

        let entry = match current {
            Some(mut e) => {
                e.owner = new;
                e
            }
            None => LineEntry::new(new, 0, Vec::new()),
        };
        put_entry(&h.lines, line, &entry)?;
        Ok(new)
    }

    fn initialize(&self, line: LineId, owner: Owner) -> Result<bool> {
        let guard = self.write_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };

        match get_entry(&h.lines, line)? {
            Some(mut entry) if entry.owner == owner && entry.version == 0 => {
                entry.version = 1;
                entry.data.clear();
                put_entry(&h.lines, line, &entry)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn read(&self, line: LineId) -> Result<Option<LineEntry>> {
        let guard = self.read_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };
        get_entry(&h.lines, line)
    }

    fn write(&self, line: LineId, entry: LineEntry, txn: Option<&mut Txn>) -> Result<()> {
        match txn {
            Some(txn) => {
                self.check_open()?;
                txn.push(TxnOp::Write(line, entry));
                Ok(())
            }
            None => {
                let guard = self.write_handles()?;
                let Some(h) = guard.as_ref() else {
                    return Err(StoreError::Closed);
                };
                put_entry(&h.lines, line, &entry)
            }
        }
    }

    fn delete(&self, line: LineId, txn: &mut Txn) -> Result<()> {
        self.check_open()?;
        txn.push(TxnOp::Delete(line));
        Ok(())
    }

    fn remove_owner(&self, node: NodeId) -> Result<usize> {
        let guard = self.write_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };

        let owner = Owner::Node(node);
        let mut batch = h.db.batch();
        let mut reassigned = 0;
        for (id, mut entry) in scan(&h.lines)? {
            if entry.owner != owner {
                continue;
            }
            entry.owner = Owner::Authority;
            batch.insert(&h.lines, id.to_key(), postcard::to_allocvec(&entry)?);
            reassigned += 1;
        }
        batch.commit().map_err(storage_err)?;
        debug!(%node, reassigned, "reassigned lines to authority");
        Ok(reassigned)
    }

    fn begin_transaction(&self) -> Result<Txn> {
        self.check_open()?;
        Ok(Txn::new(self.next_txn.fetch_add(1, Ordering::SeqCst)))
    }

    fn commit(&self, txn: Txn) -> Result<()> {
        let guard = self.write_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };

        let id = txn.id();
        let ops = txn.into_ops();
        check_versions(&ops, |line| {
            Ok(get_entry(&h.lines, line)?.map(|e| e.version))
        })?;
        let mut batch = h.db.batch();
        for op in ops {
            match op {
                TxnOp::Write(line, entry) => {
                    batch.insert(&h.lines, line.to_key(), postcard::to_allocvec(&entry)?);
                }
                TxnOp::Delete(line) => {
                    batch.remove(&h.lines, line.to_key());
                }
            }
        }
        batch.commit().map_err(storage_err)?;
        debug!(txn = id, "committed transaction");
        Ok(())
    }

    fn abort(&self, txn: Txn) {
        debug!(txn = txn.id(), "discarded transaction");
    }

    fn max_id(&self) -> Result<Option<LineId>> {
        let guard = self.read_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };
        match h.lines.last_key_value() {
            Some(kv) => {
                let (k, _) = kv.into_inner().map_err(storage_err)?;
                let id = LineId::from_key(&k).ok_or_else(|| StoreError::CorruptKey(k.to_vec()))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    fn dump(&self) -> Result<Vec<(LineId, LineEntry)>> {
        let guard = self.read_handles()?;
        let Some(h) = guard.as_ref() else {
            return Err(StoreError::Closed);
        };
        scan(&h.lines)
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.handles.write().map_err(|_| StoreError::Poisoned)?;
        if guard.take().is_some() {
            info!("line store closed");
        }
        Ok(())
    }
}
