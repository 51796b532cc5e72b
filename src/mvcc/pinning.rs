//! Snapshot pinning and the record reuse limit
//!
//! Every open snapshot pins the lowest id it may still need to read: the
//! smallest member of its invalid set, or its own id when that set is
//! empty. The lowest pin across all open snapshots bounds which records
//! are provably invisible:
//!
//! - A record stamped at or below `reuse_limit` and obscured by a newer
//!   record also at or below the limit can be seen by no open snapshot
//! - Records of abandoned snapshots can be seen by no snapshot at all
//!
//! This module provides:
//! - `PinHandle` - Opaque ticket returned by `PinningTable::pin`
//! - `PinningTable` - Multiset of pinned ids with O(log n) lowest-pin lookup

use std::collections::{BTreeMap, HashMap};

use super::snapshot_id::SnapshotId;

/// Ticket identifying one pin in a `PinningTable`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PinHandle(u64);

/// Multiset of pinned snapshot ids.
#[derive(Debug, Default)]
pub struct PinningTable {
    next_handle: u64,
    handles: HashMap<PinHandle, SnapshotId>,
    counts: BTreeMap<SnapshotId, usize>,
}

impl PinningTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `id` and returns the ticket that releases it.
    pub fn pin(&mut self, id: SnapshotId) -> PinHandle {
        let handle = PinHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, id);
        *self.counts.entry(id).or_insert(0) += 1;
        handle
    }

    /// Releases a pin. Returns false if the handle was already released.
    pub fn release(&mut self, handle: PinHandle) -> bool {
        let Some(id) = self.handles.remove(&handle) else {
            return false;
        };
        if let Some(count) = self.counts.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&id);
            }
        }
        true
    }

    /// Lowest pinned id, or `default` when nothing is pinned.
    pub fn lowest_or(&self, default: SnapshotId) -> SnapshotId {
        self.counts.keys().next().copied().unwrap_or(default)
    }

    /// Number of live pins.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
