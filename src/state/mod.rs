//! State objects
//!
//! A state object is a shared, mutable value holder whose history lives in
//! a `RecordChain`. All access goes through the snapshot read and write
//! paths; state objects never mutate their records directly.
//!
//! This module provides:
//! - `StateObject` - The capability trait the snapshot runtime works with
//! - `StateId` - Process-unique identity for state objects
//! - `MergeOutcome` - How a state object resolves a concurrent write
//! - `MutableState` - A single value cell
//! - `StateList` - A copy-on-write list
//! - `SnapshotMutationPolicy` - Equivalence and merge rules for values

mod mutable_state;
mod policy;
mod state_list;

pub use mutable_state::{mutable_state_of, mutable_state_with_policy, MutableState};
pub use policy::{NeverEqualPolicy, SnapshotMutationPolicy, StructuralEqualityPolicy};
pub use state_list::StateList;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::mvcc::{RecordChain, RecordRef};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a state object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StateId(u64);

impl StateId {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Allocates a fresh, process-unique id.
    pub fn allocate() -> Self {
        Self(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Resolution chosen by `StateObject::merge_records`.
pub enum MergeOutcome {
    /// Keep the record the applying snapshot wrote
    Applied,
    /// Keep the concurrently applied record and drop this snapshot's write
    Current,
    /// Publish a new record holding a combined value
    Merged(RecordRef),
}

impl fmt::Debug for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::Applied => write!(f, "Applied"),
            MergeOutcome::Current => write!(f, "Current"),
            MergeOutcome::Merged(record) => write!(f, "Merged({})", record.snapshot_id()),
        }
    }
}

/// Shared handle to a state object.
pub type StateObjectRef = Arc<dyn StateObject>;

/// Capability interface of every value holder.
pub trait StateObject: Send + Sync + 'static {
    fn state_id(&self) -> StateId;

    /// The object's record history.
    fn records(&self) -> &RecordChain;

    /// Newest record.
    fn first_record(&self) -> RecordRef {
        self.records().first()
    }

    /// Makes `record` the newest record. Callers hold the global write lock.
    fn prepend_record(&self, record: RecordRef) {
        self.records().prepend(record)
    }

    /// Resolves a write-write conflict.
    ///
    /// `previous` is what the applying snapshot saw when it was taken,
    /// `current` is what has been applied since, and `applied` is what the
    /// snapshot wrote. `None` rejects the apply. Called without any lock
    /// held; implementations must not take or apply snapshots.
    fn merge_records(
        &self,
        previous: &RecordRef,
        current: &RecordRef,
        applied: &RecordRef,
    ) -> Option<MergeOutcome> {
        let _ = (previous, current, applied);
        None
    }
}

impl fmt::Debug for dyn StateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateObject")
            .field("id", &self.state_id())
            .field("records", self.records())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_ids_are_unique() {
        let a = StateId::allocate();
        let b = StateId::allocate();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_state_id_display() {
        assert_eq!(StateId::new(12).to_string(), "@12");
    }
}
