//! Read, write and apply observers
//!
//! Downstream recomputation hooks into the snapshot runtime through three
//! callback kinds:
//! - read observers see every logical read
//! - write observers see every write, flagged when it is the first write to
//!   that object in the snapshot
//! - apply observers see the change set of every successful apply and of
//!   every global-snapshot advance that carried writes
//!
//! # Registries
//!
//! Global registries are copy-on-write lists. A notifying pass iterates the
//! list it loaded when the pass began, so registering or removing an
//! observer from inside a callback never blocks and only affects the next
//! pass. Notification never happens while the global write lock is held.

mod registry;

pub use registry::ObserverHandle;
pub(crate) use registry::ObserverRegistry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::snapshot::Snapshot;
use crate::state::{StateId, StateObject, StateObjectRef};

/// Called with each state object read.
pub type ReadObserver = Arc<dyn Fn(&dyn StateObject) + Send + Sync>;

/// Called with each state object written and whether the write created this
/// snapshot's record for it.
pub type WriteObserver = Arc<dyn Fn(&dyn StateObject, bool) + Send + Sync>;

/// Called after a successful apply with the objects it changed.
pub type ApplyObserver = Arc<dyn Fn(&ChangeSet, &Snapshot) + Send + Sync>;

/// Objects changed by one apply, ordered by `StateId`.
#[derive(Clone, Default)]
pub struct ChangeSet {
    objects: BTreeMap<StateId, StateObjectRef>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(objects: BTreeMap<StateId, StateObjectRef>) -> Self {
        Self { objects }
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<StateId> {
        self.objects.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateObjectRef> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.objects.keys()).finish()
    }
}

/// Runs `first` then `second`, whichever are present.
pub(crate) fn merge_read_observers(
    first: Option<ReadObserver>,
    second: Option<ReadObserver>,
) -> Option<ReadObserver> {
    match (first, second) {
        (Some(a), Some(b)) => Some(Arc::new(move |state: &dyn StateObject| {
            a(state);
            b(state);
        })),
        (a, b) => a.or(b),
    }
}

/// Runs `first` then `second`, whichever are present.
pub(crate) fn merge_write_observers(
    first: Option<WriteObserver>,
    second: Option<WriteObserver>,
) -> Option<WriteObserver> {
    match (first, second) {
        (Some(a), Some(b)) => Some(Arc::new(move |state: &dyn StateObject, is_new: bool| {
            a(state, is_new);
            b(state, is_new);
        })),
        (a, b) => a.or(b),
    }
}
