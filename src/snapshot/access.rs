//! Read and write paths
//!
//! Reads are lock-free: they resolve the snapshot's published view and walk
//! the object's chain. Writes run under the global write lock, find or make
//! the record owned by the writing snapshot, and mutate it before the lock
//! is released.

use tracing::trace;

use super::runtime::{runtime, GlobalState, Runtime};
use super::{current, Snapshot, SnapshotError, SnapshotKind, SnapshotResult};
use crate::mvcc::{ReadView, RecordRef, Visibility, UNDER_CONSTRUCTION};
use crate::observability::Event;
use crate::state::{StateObject, StateObjectRef};

/// The record of `state` that `snapshot` reads, notifying read observers.
pub fn readable(state: &dyn StateObject, snapshot: &Snapshot) -> SnapshotResult<RecordRef> {
    snapshot.ensure_readable()?;
    let inner = snapshot.resolve();
    let scope = current::observation_for(snapshot);
    if let Some(observer) = scope.as_ref().and_then(|s| s.read_observer.as_ref()) {
        observer(state);
    }
    if !scope.is_some_and(|s| s.reads_suppressed) {
        if snapshot.kind() == SnapshotKind::Global {
            for observer in runtime().global_read_observers.load() {
                observer(state);
            }
        } else if let Some(observer) = &inner.read_observer {
            observer(state);
        }
    }
    read_record(state, &inner.view())
}

/// Visible record under `view`, without notifying anyone.
///
/// Falls back to the oldest record when nothing is valid, as long as it was
/// neither abandoned nor is still being written.
pub(crate) fn read_record(state: &dyn StateObject, view: &ReadView) -> SnapshotResult<RecordRef> {
    if let Some(record) = Visibility::readable(state.records(), view) {
        return Ok(record);
    }
    let oldest = state.records().oldest();
    let stamp = oldest.snapshot_id();
    if !stamp.is_invalid() && stamp != UNDER_CONSTRUCTION {
        return Ok(oldest);
    }
    Err(SnapshotError::NoVisibleRecord {
        state: state.state_id(),
        snapshot: view.id(),
    })
}

/// The record of `state` owned by `snapshot`, creating it if needed.
pub fn writable(state: &StateObjectRef, snapshot: &Snapshot) -> SnapshotResult<RecordRef> {
    writable_with(state, snapshot, |record| Ok(RecordRef::clone(record)))
}

/// Runs `mutate` on the record of `state` owned by `snapshot`, under the
/// global write lock.
///
/// Write observers run after the lock is released.
pub fn writable_with<R>(
    state: &StateObjectRef,
    snapshot: &Snapshot,
    mutate: impl FnOnce(&RecordRef) -> SnapshotResult<R>,
) -> SnapshotResult<R> {
    if snapshot.is_read_only() {
        return Err(SnapshotError::ReadOnlySnapshot { snapshot: snapshot.id() });
    }
    let rt = runtime();
    let (result, is_new, target) = {
        let st = rt.lock();
        snapshot.ensure_open()?;
        let target = snapshot.resolve();
        let view = target.view();
        let readable = read_record(&**state, &view)?;

        let (record, is_new) = if readable.snapshot_id() == view.id() {
            (readable, false)
        } else {
            let record = new_writable_record(rt, &st, state, &readable, &view)?;
            // After a view advance the object may already be modified here.
            let first = target
                .state
                .lock()
                .modified
                .insert(state.state_id(), StateObjectRef::clone(state))
                .is_none();
            (record, first)
        };
        let result = mutate(&record)?;
        trace!(
            state = state.state_id().value(),
            snapshot_id = view.id().value(),
            is_new,
            "write"
        );
        (result, is_new, target)
    };

    if snapshot.kind() == SnapshotKind::Global {
        for observer in rt.global_write_observers.load() {
            observer(&**state, is_new);
        }
    } else if let Some(observer) = &target.write_observer {
        observer(&**state, is_new);
    }
    if let Some(observer) = current::observation_for(snapshot).and_then(|s| s.write_observer) {
        observer(&**state, is_new);
    }
    Ok(result)
}

/// A record stamped with the view's id holding a copy of `readable`.
///
/// Reuses a record no open snapshot can see when reuse is enabled.
fn new_writable_record(
    rt: &Runtime,
    st: &GlobalState,
    state: &StateObjectRef,
    readable: &RecordRef,
    view: &ReadView,
) -> SnapshotResult<RecordRef> {
    if rt.config().record_reuse {
        if let Some(record) = Visibility::reusable(state.records(), rt.reuse_limit(st)) {
            record.stamp().set(UNDER_CONSTRUCTION);
            record.assign(&**readable)?;
            record.stamp().set(view.id());
            rt.metrics().increment_records_reused();
            trace!(
                event = Event::RecordReused.as_str(),
                state = state.state_id().value(),
                snapshot_id = view.id().value(),
            );
            return Ok(record);
        }
    }
    let record = readable.create();
    record.assign(&**readable)?;
    record.stamp().set(view.id());
    state.prepend_record(RecordRef::clone(&record));
    rt.metrics().increment_records_created();
    Ok(record)
}
