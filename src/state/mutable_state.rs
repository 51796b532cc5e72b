//! Single-value state cells

use std::fmt;
use std::sync::Arc;

use super::{
    MergeOutcome, SnapshotMutationPolicy, StateId, StateObject, StateObjectRef,
    StructuralEqualityPolicy,
};
use crate::mvcc::{RecordChain, RecordRef, ValueRecord, FIRST_SNAPSHOT, UNDER_CONSTRUCTION};
use crate::snapshot::{readable, writable_with, Snapshot, SnapshotKind, SnapshotResult};

/// Chain for a new object, stamped with the current snapshot's id.
///
/// Objects created inside a snapshot also get a record stamped with the
/// first snapshot id, so snapshots that cannot see the creating snapshot
/// still read the initial value.
pub(crate) fn initial_chain<T: Send + Sync + 'static>(value: Arc<T>) -> RecordChain {
    let snapshot = Snapshot::current();
    let id = snapshot.id();
    if snapshot.kind() == SnapshotKind::Global || id == FIRST_SNAPSHOT {
        return RecordChain::new(Arc::new(ValueRecord::from_arc(id, value)));
    }
    let first = ValueRecord::from_arc(FIRST_SNAPSHOT, Arc::clone(&value));
    let chain = RecordChain::new(Arc::new(first));
    chain.prepend(Arc::new(ValueRecord::from_arc(id, value)));
    chain
}

struct StateCell<T> {
    id: StateId,
    records: RecordChain,
    policy: Arc<dyn SnapshotMutationPolicy<T>>,
}

impl<T: Send + Sync + 'static> StateObject for StateCell<T> {
    fn state_id(&self) -> StateId {
        self.id
    }

    fn records(&self) -> &RecordChain {
        &self.records
    }

    fn merge_records(
        &self,
        previous: &RecordRef,
        current: &RecordRef,
        applied: &RecordRef,
    ) -> Option<MergeOutcome> {
        let previous = ValueRecord::<T>::downcast(&**previous).ok()?.value();
        let current = ValueRecord::<T>::downcast(&**current).ok()?.value();
        let applied = ValueRecord::<T>::downcast(&**applied).ok()?.value();
        if self.policy.equivalent(&current, &applied) {
            return Some(MergeOutcome::Current);
        }
        let merged = self.policy.merge(&previous, &current, &applied)?;
        Some(MergeOutcome::Merged(Arc::new(ValueRecord::new(UNDER_CONSTRUCTION, merged))))
    }
}

/// A snapshot-isolated value.
///
/// Clones share the same underlying state object.
pub struct MutableState<T> {
    cell: Arc<StateCell<T>>,
}

impl<T> Clone for MutableState<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

/// A state cell compared with `==`.
pub fn mutable_state_of<T: PartialEq + Send + Sync + 'static>(value: T) -> MutableState<T> {
    mutable_state_with_policy(value, StructuralEqualityPolicy)
}

/// A state cell with a custom policy.
pub fn mutable_state_with_policy<T, P>(value: T, policy: P) -> MutableState<T>
where
    T: Send + Sync + 'static,
    P: SnapshotMutationPolicy<T> + 'static,
{
    MutableState::with_policy(value, Arc::new(policy))
}

impl<T: Send + Sync + 'static> MutableState<T> {
    pub fn with_policy(value: T, policy: Arc<dyn SnapshotMutationPolicy<T>>) -> Self {
        Self {
            cell: Arc::new(StateCell {
                id: StateId::allocate(),
                records: initial_chain(Arc::new(value)),
                policy,
            }),
        }
    }

    pub fn state_id(&self) -> StateId {
        self.cell.id
    }

    pub fn as_state_object(&self) -> StateObjectRef {
        let object: StateObjectRef = self.cell.clone();
        object
    }

    pub fn policy(&self) -> &dyn SnapshotMutationPolicy<T> {
        self.cell.policy.as_ref()
    }

    /// Value visible to `snapshot`.
    pub fn get_in(&self, snapshot: &Snapshot) -> SnapshotResult<Arc<T>> {
        let record = readable(self.cell.as_ref(), snapshot)?;
        Ok(ValueRecord::<T>::downcast(&*record)?.value())
    }

    /// Value visible to the current snapshot.
    pub fn get(&self) -> SnapshotResult<Arc<T>> {
        self.get_in(&Snapshot::current())
    }

    /// Writes `value` in `snapshot`; a no-op when the policy finds it
    /// equivalent to what the snapshot sees.
    pub fn set_in(&self, snapshot: &Snapshot, value: T) -> SnapshotResult<()> {
        snapshot.ensure_readable()?;
        let seen = crate::snapshot::read_record(self.cell.as_ref(), &snapshot.read_view())?;
        if self
            .cell
            .policy
            .equivalent(&ValueRecord::<T>::downcast(&*seen)?.value(), &value)
        {
            return Ok(());
        }
        let value = Arc::new(value);
        writable_with(&self.as_state_object(), snapshot, move |record| {
            ValueRecord::<T>::downcast(&**record)?.set_value(value);
            Ok(())
        })
    }

    /// Writes `value` in the current snapshot.
    pub fn set(&self, value: T) -> SnapshotResult<()> {
        self.set_in(&Snapshot::current(), value)
    }

    /// Replaces the current value with `f(current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> SnapshotResult<()> {
        let snapshot = Snapshot::current();
        let current = self.get_in(&snapshot)?;
        self.set_in(&snapshot, f(&current))
    }
}

impl<T: Clone + Send + Sync + 'static> MutableState<T> {
    /// Owned copy of the current value.
    pub fn value(&self) -> SnapshotResult<T> {
        self.get().map(|value| T::clone(&value))
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableState")
            .field("id", &self.cell.id)
            .field("records", &self.cell.records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NeverEqualPolicy;

    #[test]
    fn test_new_state_reads_initial_value() {
        let state = mutable_state_of(7);
        assert_eq!(*state.get().unwrap(), 7);
        assert_eq!(state.value().unwrap(), 7);
    }

    #[test]
    fn test_clones_share_identity() {
        let a = mutable_state_of("x".to_string());
        let b = a.clone();
        assert_eq!(a.state_id(), b.state_id());
        assert_eq!(a.as_state_object().state_id(), a.state_id());
    }

    #[test]
    fn test_equivalent_write_is_skipped() {
        let state = mutable_state_of(3);
        let before = state.as_state_object().records().len();
        state.set(3).unwrap();
        assert_eq!(state.as_state_object().records().len(), before);
    }

    #[test]
    fn test_merge_records_prefers_current_when_equivalent() {
        let state = mutable_state_of(1);
        let object = state.as_state_object();
        let previous: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 1));
        let current: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 2));
        let applied: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 2));
        let outcome = object.merge_records(&previous, &current, &applied);
        assert!(matches!(outcome, Some(MergeOutcome::Current)));
    }

    #[test]
    fn test_merge_records_conflicts_without_merge() {
        let state = mutable_state_with_policy(1, NeverEqualPolicy);
        let object = state.as_state_object();
        let previous: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 1));
        let current: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 2));
        let applied: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 3));
        assert!(object.merge_records(&previous, &current, &applied).is_none());
    }

    #[test]
    fn test_merged_record_is_unpublished() {
        struct Sum;
        impl SnapshotMutationPolicy<i32> for Sum {
            fn equivalent(&self, a: &i32, b: &i32) -> bool {
                a == b
            }
            fn merge(&self, previous: &i32, current: &i32, applied: &i32) -> Option<i32> {
                Some(current + applied - previous)
            }
        }
        let state = mutable_state_with_policy(0, Sum);
        let object = state.as_state_object();
        let previous: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 0));
        let current: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 5));
        let applied: RecordRef = Arc::new(ValueRecord::new(FIRST_SNAPSHOT, 2));
        match object.merge_records(&previous, &current, &applied) {
            Some(MergeOutcome::Merged(record)) => {
                assert_eq!(record.snapshot_id(), UNDER_CONSTRUCTION);
                assert_eq!(*ValueRecord::<i32>::downcast(&*record).unwrap().value(), 7);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
