//! Cluster-wide allocation of ordinary line ids.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use reef_types::{LineId, MAX_RESERVED_LINE};

/// First id handed out by a fresh allocator.
const FIRST_ORDINARY_LINE: u64 = MAX_RESERVED_LINE + 1;

/// Hands out ordinary (non-reserved) line ids from an atomic counter.
///
/// The counter only moves forward: seeding it below its current value is a
/// no-op, and it never enters the reserved range.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator starting at the first ordinary id.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(FIRST_ORDINARY_LINE),
        }
    }

    /// Advance the counter so the next id is at least `next`.
    pub fn set_counter(&self, next: u64) {
        self.next
            .fetch_max(next.max(FIRST_ORDINARY_LINE), Ordering::SeqCst);
    }

    /// The id the next allocation will return.
    pub fn peek(&self) -> LineId {
        LineId::new(self.next.load(Ordering::SeqCst))
    }

    /// Allocate one id, or `None` once the id space is exhausted.
    pub fn allocate(&self) -> Option<LineId> {
        self.allocate_range(1).map(|r| LineId::new(r.start))
    }

    /// Allocate `count` consecutive ids, or `None` if they would run past
    /// the end of the id space.
    pub fn allocate_range(&self, count: u64) -> Option<Range<u64>> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(count))
            .ok()
            .map(|start| start..start + count)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
