//! Counters fed by the authority.
//!
//! The authority reports what it does through [`AuthorityMonitor`]. Calls
//! are fire-and-forget and never influence protocol decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observer of authority activity.
pub trait AuthorityMonitor: Send + Sync {
    /// A node was recorded as the new owner of a line.
    fn add_owner_write(&self);

    /// A line's contents were served to a node.
    fn add_object_served(&self);

    /// A node was redirected to the line's current owner.
    fn add_owner_served(&self);

    /// A backup transaction with `entries` lines was started.
    fn add_transaction(&self, entries: usize);
}

/// Monitor that discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl AuthorityMonitor for NoopMonitor {
    fn add_owner_write(&self) {}
    fn add_object_served(&self) {}
    fn add_owner_served(&self) {}
    fn add_transaction(&self, _entries: usize) {}
}

/// Point-in-time copy of a [`CountingMonitor`]'s totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub owner_writes: u64,
    pub objects_served: u64,
    pub owners_served: u64,
    pub transactions: u64,
    pub transaction_entries: u64,
}

/// Monitor keeping running totals in atomics.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    owner_writes: AtomicU64,
    objects_served: AtomicU64,
    owners_served: AtomicU64,
    transactions: AtomicU64,
    transaction_entries: AtomicU64,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every counter.
    ///
    /// Counters are read one by one, so a snapshot taken under load may mix
    /// values from slightly different instants.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            owner_writes: self.owner_writes.load(Ordering::Relaxed),
            objects_served: self.objects_served.load(Ordering::Relaxed),
            owners_served: self.owners_served.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            transaction_entries: self.transaction_entries.load(Ordering::Relaxed),
        }
    }
}

impl AuthorityMonitor for CountingMonitor {
    fn add_owner_write(&self) {
        self.owner_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn add_object_served(&self) {
        self.objects_served.fetch_add(1, Ordering::Relaxed);
    }

    fn add_owner_served(&self) {
        self.owners_served.fetch_add(1, Ordering::Relaxed);
    }

    fn add_transaction(&self, entries: usize) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
        self.transaction_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
    }
}
