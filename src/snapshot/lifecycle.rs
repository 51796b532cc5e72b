//! Taking, advancing, closing and disposing snapshots
//!
//! Every function here that ends in `_locked` runs with the global write
//! lock held and takes the guarded state explicitly.

use std::sync::Arc;

use tracing::{debug, trace};

use super::runtime::{runtime, GlobalState, Runtime};
use super::{
    current, Snapshot, SnapshotError, SnapshotInner, SnapshotKind, SnapshotResult, SnapshotState,
    SnapshotStatus,
};
use crate::mvcc::{ReadView, INVALID_SNAPSHOT};
use crate::observability::Event;
use crate::observer::{merge_read_observers, merge_write_observers, ReadObserver, WriteObserver};
use crate::state::StateObjectRef;

impl SnapshotInner {
    /// Moves a mutable snapshot to a fresh id so that records it already
    /// wrote become frozen history for anything nested before the move.
    pub(crate) fn advance_locked(
        &self,
        rt: &Runtime,
        st: &mut GlobalState,
        state: &mut SnapshotState,
    ) {
        let view = self.view();
        state.previous_ids = state.previous_ids.set(view.id());
        if self.status().is_terminal() {
            return;
        }
        let id = rt.allocate_id(st);
        st.open = st.open.set(id);
        let invalid = view.invalid().add_range(view.id().next(), id);
        self.view.store(Arc::new(ReadView::new(id, invalid)));
        trace!(
            event = Event::SnapshotAdvanced.as_str(),
            from = view.id().value(),
            to = id.value(),
        );
    }

    /// Removes this snapshot's ids from the open set.
    pub(crate) fn close_locked(&self, st: &mut GlobalState, state: &mut SnapshotState) {
        if state.closed {
            return;
        }
        state.closed = true;
        st.open = st.open.clear(self.id()).and_not(&state.previous_ids);
    }

    pub(crate) fn release_pins_locked(&self, st: &mut GlobalState, state: &mut SnapshotState) {
        for pin in state.previous_pins.drain(..).chain(state.pin.take()) {
            st.pinning.release(pin);
        }
    }

    /// Marks every record this snapshot wrote as abandoned and returns the
    /// objects that held them.
    fn abandon_locked(&self, state: &mut SnapshotState) -> Vec<StateObjectRef> {
        let id = self.id();
        let modified = std::mem::take(&mut state.modified);
        for object in modified.values() {
            for record in object.records().load().iter() {
                let stamp = record.snapshot_id();
                if stamp == id || state.previous_ids.get(stamp) {
                    record.stamp().set(INVALID_SNAPSHOT);
                }
            }
        }
        modified.into_values().collect()
    }

    /// Releases one activity token: the snapshot's own, or one held by an
    /// open nested child. The last release closes the snapshot and passes
    /// the release on to its parent.
    pub(crate) fn deactivate_locked(&self, rt: &Runtime, st: &mut GlobalState) {
        let (finished, abandoned) = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            if state.active > 0 {
                (false, Vec::new())
            } else {
                let abandoned = if self.kind.is_transactional()
                    && self.status() != SnapshotStatus::Applied
                {
                    self.abandon_locked(&mut state)
                } else {
                    Vec::new()
                };
                self.close_locked(st, &mut state);
                self.release_pins_locked(st, &mut state);
                (true, abandoned)
            }
        };
        rt.trim_locked(st, abandoned.iter());
        if finished {
            if let Some(parent) = &self.parent {
                parent.inner.deactivate_locked(rt, st);
            }
        }
    }
}

impl Snapshot {
    /// Takes a read-only snapshot nested in this one.
    ///
    /// It sees this snapshot's writes so far and nothing written afterwards.
    pub fn take_nested_snapshot(
        &self,
        read_observer: Option<ReadObserver>,
    ) -> SnapshotResult<Snapshot> {
        let (read_observer, _) = self.inherited_observers(read_observer, None);
        if self.kind() == SnapshotKind::Global {
            return take_from_global(SnapshotKind::Readonly, read_observer, None);
        }
        let rt = runtime();
        let snapshot = {
            let mut st = rt.lock();
            self.ensure_open()?;
            let mut state = self.inner.state.lock();
            let base = self.inner.view();
            let id = rt.allocate_id(&mut st);
            st.open = st.open.set(id);
            let invalid = base.invalid().add_range(base.id().next(), id);
            if self.kind().is_transactional() {
                self.inner.advance_locked(rt, &mut st, &mut state);
            }
            state.active += 1;
            let pin = st.pinning.pin(invalid.lowest(id));
            SnapshotInner::new(
                SnapshotKind::NestedReadonly,
                Some(self.clone()),
                ReadView::new(id, invalid),
                read_observer,
                None,
                pin,
            )
        };
        Ok(taken(snapshot))
    }

    /// Takes a mutable snapshot nested in this one.
    ///
    /// Its writes stay invisible to this snapshot until it is applied.
    pub fn take_nested_mutable_snapshot(
        &self,
        read_observer: Option<ReadObserver>,
        write_observer: Option<WriteObserver>,
    ) -> SnapshotResult<Snapshot> {
        let (read_observer, write_observer) =
            self.inherited_observers(read_observer, write_observer);
        match self.kind() {
            SnapshotKind::Global => {
                return take_from_global(SnapshotKind::Mutable, read_observer, write_observer);
            }
            SnapshotKind::Readonly | SnapshotKind::NestedReadonly => {
                return Err(SnapshotError::ReadOnlyParent { parent: self.id() });
            }
            _ => {}
        }
        let rt = runtime();
        let snapshot = {
            let mut st = rt.lock();
            self.ensure_open()?;
            let mut state = self.inner.state.lock();
            let base = self.inner.view();
            let id = rt.allocate_id(&mut st);
            st.open = st.open.set(id);
            let invalid = base.invalid().add_range(base.id().next(), id);
            self.inner
                .view
                .store(Arc::new(ReadView::new(base.id(), base.invalid().set(id))));
            self.inner.advance_locked(rt, &mut st, &mut state);
            state.active += 1;
            let pin = st.pinning.pin(invalid.lowest(id));
            SnapshotInner::new(
                SnapshotKind::NestedMutable,
                Some(self.clone()),
                ReadView::new(id, invalid),
                read_observer,
                write_observer,
                pin,
            )
        };
        Ok(taken(snapshot))
    }

    /// Observers for a snapshot taken from this one: the given ones, then
    /// those of an observation scope on this snapshot, then this snapshot's
    /// own. A scope that silences reads drops this snapshot's read observer.
    fn inherited_observers(
        &self,
        read_observer: Option<ReadObserver>,
        write_observer: Option<WriteObserver>,
    ) -> (Option<ReadObserver>, Option<WriteObserver>) {
        let scope = current::observation_for(self);
        let own_read = if scope.as_ref().is_some_and(|s| s.reads_suppressed) {
            None
        } else {
            self.inner.read_observer.clone()
        };
        let (scope_read, scope_write) = scope
            .map(|s| (s.read_observer, s.write_observer))
            .unwrap_or_default();
        (
            merge_read_observers(merge_read_observers(read_observer, scope_read), own_read),
            merge_write_observers(
                merge_write_observers(write_observer, scope_write),
                self.inner.write_observer.clone(),
            ),
        )
    }

    /// Discards the snapshot without applying it.
    ///
    /// Records it wrote are abandoned once its nested children are gone too.
    pub fn dispose(&self) -> SnapshotResult<()> {
        if self.kind() == SnapshotKind::Global {
            return Err(SnapshotError::GlobalDispose);
        }
        self.inner
            .transition(SnapshotStatus::Open, SnapshotStatus::Disposed)
            .map_err(|status| self.status_error(status))?;
        current::release_if_current(self);
        let rt = runtime();
        {
            let mut st = rt.lock();
            self.inner.deactivate_locked(rt, &mut st);
        }
        rt.metrics().increment_snapshots_disposed();
        debug!(event = Event::SnapshotDisposed.as_str(), snapshot_id = self.id().value());
        Ok(())
    }

    /// Makes objects created so far in this snapshot count as existing, so
    /// later writes to them are reported as modifications.
    pub fn notify_objects_initialized(&self) -> SnapshotResult<()> {
        match self.kind() {
            SnapshotKind::Global => {
                runtime().advance_global();
                Ok(())
            }
            SnapshotKind::Mutable | SnapshotKind::NestedMutable => {
                let rt = runtime();
                let mut st = rt.lock();
                self.ensure_open()?;
                let mut state = self.inner.state.lock();
                self.inner.advance_locked(rt, &mut st, &mut state);
                Ok(())
            }
            SnapshotKind::Readonly | SnapshotKind::NestedReadonly => Ok(()),
        }
    }

    /// Compacts the record chains of `objects` now, whatever `trim_records`
    /// says. Returns the number of records dropped.
    pub fn trim<'a>(objects: impl IntoIterator<Item = &'a StateObjectRef>) -> usize {
        let rt = runtime();
        let st = rt.lock();
        rt.trim_chains_locked(&st, objects.into_iter())
    }

    /// Error for a lifecycle call that found the snapshot in `status`.
    pub(crate) fn status_error(&self, status: SnapshotStatus) -> SnapshotError {
        let snapshot = self.inner.id();
        match status {
            SnapshotStatus::Applying => SnapshotError::ApplyInProgress { snapshot },
            SnapshotStatus::Applied => SnapshotError::AlreadyApplied { snapshot },
            SnapshotStatus::Disposed => SnapshotError::AlreadyDisposed { snapshot },
            SnapshotStatus::Open => SnapshotError::NotOpen { snapshot, status },
        }
    }
}

/// Takes a top-level snapshot and advances the global snapshot past it.
fn take_from_global(
    kind: SnapshotKind,
    read_observer: Option<ReadObserver>,
    write_observer: Option<WriteObserver>,
) -> SnapshotResult<Snapshot> {
    let rt = runtime();
    let (snapshot, previous, changes) = {
        let mut st = rt.lock();
        let global = rt.global();
        let invalid = st.open.clear(global.id());
        let id = rt.allocate_id(&mut st);
        st.open = st.open.set(id);
        let pin = st.pinning.pin(invalid.lowest(id));
        let snapshot = SnapshotInner::new(
            kind,
            None,
            ReadView::new(id, invalid),
            read_observer,
            write_observer,
            pin,
        );
        let (previous, changes) = rt.advance_global_locked(&mut st);
        (snapshot, previous, changes)
    };
    rt.notify_apply(&changes, &Snapshot::retired_global(previous));
    Ok(taken(snapshot))
}

fn taken(inner: SnapshotInner) -> Snapshot {
    let snapshot = Snapshot::from_inner(Arc::new(inner));
    runtime().metrics().increment_snapshots_taken();
    debug!(
        event = Event::SnapshotTaken.as_str(),
        snapshot_id = snapshot.id().value(),
        kind = ?snapshot.kind(),
    );
    snapshot
}
