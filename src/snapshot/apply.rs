//! Optimistic apply
//!
//! Applying a mutable snapshot publishes its writes to the global state (or
//! to its parent, when nested). For every object the snapshot wrote, three
//! records matter:
//!
//! - `current`: what the target sees now
//! - `previous`: what the target saw when the snapshot was taken
//! - `applied`: what the snapshot wrote
//!
//! When `current` and `previous` differ someone else applied a write in the
//! meantime, and the object's merge policy decides. Policies run without
//! the global lock; their results are checked again under the lock and are
//! recomputed when the target moved on in between.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::runtime::{runtime, GlobalState, Runtime};
use super::{
    current, Snapshot, SnapshotError, SnapshotInner, SnapshotKind, SnapshotResult, SnapshotStatus,
};
use crate::mvcc::{
    same_record, PinHandle, ReadView, RecordRef, SnapshotId, SnapshotIdSet, Visibility,
};
use crate::observability::Event;
use crate::observer::ChangeSet;
use crate::state::{MergeOutcome, StateId, StateObjectRef};

/// Outcome of `Snapshot::apply`.
pub enum ApplyResult {
    Success,
    /// The snapshot stays open; the caller disposes it or retries
    Failure { conflicting: Vec<StateObjectRef> },
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ApplyResult::Success)
    }

    /// Ids of the objects that could not be merged.
    pub fn conflicting_ids(&self) -> Vec<StateId> {
        match self {
            ApplyResult::Success => Vec::new(),
            ApplyResult::Failure { conflicting } => {
                conflicting.iter().map(|o| o.state_id()).collect()
            }
        }
    }

    /// Turns a failure into `SnapshotError::ApplyConflict`.
    pub fn check(self, snapshot: &Snapshot) -> SnapshotResult<()> {
        match self {
            ApplyResult::Success => Ok(()),
            failure @ ApplyResult::Failure { .. } => Err(SnapshotError::ApplyConflict {
                snapshot: snapshot.id(),
                conflicting: failure.conflicting_ids(),
            }),
        }
    }
}

impl fmt::Debug for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyResult::Success => write!(f, "Success"),
            ApplyResult::Failure { .. } => f
                .debug_struct("Failure")
                .field("conflicting", &self.conflicting_ids())
                .finish(),
        }
    }
}

/// A merge decision and the `current` record it was computed against.
struct MergeEntry {
    current: RecordRef,
    outcome: Option<MergeOutcome>,
}

/// What the snapshot is applied into.
struct Target {
    id: SnapshotId,
    invalid: SnapshotIdSet,
}

enum Pass {
    Success,
    /// A merge went stale; recompute outside the lock
    Retry,
    Conflict(Vec<StateObjectRef>),
}

/// Restores `Open` unless the apply completed, including on unwind.
struct ApplyingGuard<'a> {
    inner: &'a SnapshotInner,
    done: bool,
}

impl<'a> ApplyingGuard<'a> {
    fn new(inner: &'a SnapshotInner) -> Self {
        Self { inner, done: false }
    }

    fn complete(&mut self) {
        self.inner.set_status(SnapshotStatus::Applied);
        self.done = true;
    }
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inner.set_status(SnapshotStatus::Open);
        }
    }
}

impl Snapshot {
    /// Publishes this snapshot's writes.
    ///
    /// Top-level snapshots apply to the global state and notify apply
    /// observers; nested ones apply into their parent. Conflicts are
    /// reported as `ApplyResult::Failure` and leave every state unchanged.
    pub fn apply(&self) -> SnapshotResult<ApplyResult> {
        match self.kind() {
            SnapshotKind::Global => Err(SnapshotError::GlobalApply),
            SnapshotKind::Readonly | SnapshotKind::NestedReadonly => {
                Err(SnapshotError::ReadOnlySnapshot { snapshot: self.id() })
            }
            SnapshotKind::Mutable => self.apply_to_global(),
            SnapshotKind::NestedMutable => self.apply_to_parent(),
        }
    }

    /// Applies, disposing the snapshot if the apply conflicts.
    pub fn apply_or_dispose(&self) -> SnapshotResult<()> {
        let result = self.apply()?;
        if !result.is_success() {
            self.dispose()?;
        }
        result.check(self)
    }

    fn begin_apply(&self) -> SnapshotResult<ApplyingGuard<'_>> {
        self.inner
            .transition(SnapshotStatus::Open, SnapshotStatus::Applying)
            .map_err(|status| self.status_error(status))?;
        Ok(ApplyingGuard::new(&self.inner))
    }

    fn apply_to_global(&self) -> SnapshotResult<ApplyResult> {
        let mut guard = self.begin_apply()?;
        let rt = runtime();
        let attempts = rt.config().max_merge_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let target = {
                let st = rt.lock();
                global_target(rt, &st)
            };
            let merges = self.optimistic_merges(&target)?;

            let mut st = rt.lock();
            let target = global_target(rt, &st);
            match self.apply_pass_locked(rt, &mut st, &target, &merges, attempt >= attempts)? {
                Pass::Retry => {
                    drop(st);
                    debug!(
                        event = Event::MergeRetried.as_str(),
                        snapshot_id = self.id().value(),
                        attempt,
                    );
                    continue;
                }
                Pass::Conflict(conflicting) => {
                    drop(st);
                    return Ok(self.conflict(conflicting));
                }
                Pass::Success => {
                    let changes = {
                        let mut state = self.inner.state.lock();
                        self.inner.close_locked(&mut st, &mut state);
                        ChangeSet::from_map(std::mem::take(&mut state.modified))
                    };
                    let (previous_global, global_changes) = rt.advance_global_locked(&mut st);
                    guard.complete();
                    drop(st);

                    current::release_if_current(self);
                    rt.notify_apply(&global_changes, &Snapshot::retired_global(previous_global));
                    rt.notify_apply(&changes, self);

                    {
                        let mut st = rt.lock();
                        self.inner.deactivate_locked(rt, &mut st);
                        rt.trim_locked(&st, changes.iter());
                    }
                    rt.metrics().increment_snapshots_applied();
                    debug!(
                        event = Event::SnapshotApplied.as_str(),
                        snapshot_id = self.id().value(),
                        changed = changes.len(),
                    );
                    return Ok(ApplyResult::Success);
                }
            }
        }
    }

    fn apply_to_parent(&self) -> SnapshotResult<ApplyResult> {
        let parent = match self.parent() {
            Some(parent) => parent.clone(),
            None => return Err(SnapshotError::GlobalApply),
        };
        let mut guard = self.begin_apply()?;
        let rt = runtime();
        let attempts = rt.config().max_merge_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let merges = self.optimistic_merges(&view_target(&parent.inner))?;

            let mut st = rt.lock();
            if parent.status() != SnapshotStatus::Open {
                return Err(SnapshotError::ParentNotOpen {
                    snapshot: self.id(),
                    parent: parent.id(),
                });
            }
            let target = view_target(&parent.inner);
            match self.apply_pass_locked(rt, &mut st, &target, &merges, attempt >= attempts)? {
                Pass::Retry => {
                    drop(st);
                    debug!(
                        event = Event::MergeRetried.as_str(),
                        snapshot_id = self.id().value(),
                        attempt,
                    );
                    continue;
                }
                Pass::Conflict(conflicting) => {
                    drop(st);
                    return Ok(self.conflict(conflicting));
                }
                Pass::Success => {
                    self.hand_over_locked(rt, &mut st, &parent);
                    guard.complete();
                    self.inner.deactivate_locked(rt, &mut st);
                    drop(st);
                    current::release_if_current(self);
                    rt.metrics().increment_snapshots_applied();
                    debug!(
                        event = Event::SnapshotApplied.as_str(),
                        snapshot_id = self.id().value(),
                        parent_id = parent.id().value(),
                    );
                    return Ok(ApplyResult::Success);
                }
            }
        }
    }

    /// Moves this snapshot's writes, ids and pins into `parent`.
    fn hand_over_locked(&self, rt: &Runtime, st: &mut GlobalState, parent: &Snapshot) {
        let id = self.inner.id();
        let (modified, previous_ids, pins) = {
            let mut state = self.inner.state.lock();
            let modified = std::mem::take(&mut state.modified);
            let previous_ids = state.previous_ids.clone();
            if modified.is_empty() {
                self.inner.close_locked(st, &mut state);
                self.inner.release_pins_locked(st, &mut state);
                (modified, previous_ids, Vec::new())
            } else {
                state.closed = true;
                let mut pins: Vec<PinHandle> = state.previous_pins.drain(..).collect();
                pins.extend(state.pin.take());
                (modified, previous_ids, pins)
            }
        };

        let mut state = parent.inner.state.lock();
        if parent.inner.id() < id {
            parent.inner.advance_locked(rt, st, &mut state);
        }
        let view = parent.inner.view();
        let invalid = view.invalid().clear(id).and_not(&previous_ids);
        parent.inner.view.store(Arc::new(ReadView::new(view.id(), invalid)));
        state.modified.extend(modified);
        state.previous_ids = state.previous_ids.set(id).or(&previous_ids);
        state.previous_pins.extend(pins);
    }

    fn conflict(&self, conflicting: Vec<StateObjectRef>) -> ApplyResult {
        let rt = runtime();
        rt.metrics().increment_apply_conflicts();
        let ids: Vec<StateId> = conflicting.iter().map(|o| o.state_id()).collect();
        warn!(
            event = Event::SnapshotConflict.as_str(),
            snapshot_id = self.id().value(),
            conflicts = ?ids,
        );
        ApplyResult::Failure { conflicting }
    }

    /// Runs merge policies for every object changed since this snapshot was
    /// taken. Takes only the snapshot's own mutex.
    fn optimistic_merges(&self, target: &Target) -> SnapshotResult<HashMap<StateId, MergeEntry>> {
        let (view, start, modified) = {
            let state = self.inner.state.lock();
            let view = self.inner.view();
            let start = view.invalid().set(view.id()).or(&state.previous_ids);
            let modified: Vec<StateObjectRef> = state.modified.values().cloned().collect();
            (view, start, modified)
        };

        let mut merges = HashMap::new();
        for object in modified {
            let chain = object.records();
            let Some(current) = Visibility::readable_at(chain, target.id, &target.invalid) else {
                continue;
            };
            let Some(previous) = Visibility::readable_at(chain, view.id(), &start) else {
                continue;
            };
            if same_record(&current, &previous) {
                continue;
            }
            let applied = Visibility::readable(chain, &view).ok_or(SnapshotError::NoVisibleRecord {
                state: object.state_id(),
                snapshot: view.id(),
            })?;
            let outcome = object
                .merge_records(&previous, &current, &applied)
                .map(|outcome| normalize(outcome, &previous, &current, &applied));
            merges.insert(object.state_id(), MergeEntry { current, outcome });
        }
        Ok(merges)
    }

    /// Checks every written object against `target` and, when nothing
    /// conflicts, publishes merged records.
    fn apply_pass_locked(
        &self,
        rt: &Runtime,
        st: &mut GlobalState,
        target: &Target,
        merges: &HashMap<StateId, MergeEntry>,
        final_attempt: bool,
    ) -> SnapshotResult<Pass> {
        let mut state = self.inner.state.lock();
        let view = self.inner.view();
        let start = view.invalid().set(view.id()).or(&state.previous_ids);

        let mut conflicts = Vec::new();
        let mut stale = false;
        let mut merged: Vec<(StateObjectRef, RecordRef)> = Vec::new();
        let mut reverted: Vec<StateId> = Vec::new();

        for (id, object) in state.modified.iter() {
            let chain = object.records();
            let Some(current) = Visibility::readable_at(chain, target.id, &target.invalid) else {
                continue;
            };
            let Some(previous) = Visibility::readable_at(chain, view.id(), &start) else {
                continue;
            };
            if same_record(&current, &previous) {
                continue;
            }
            match merges.get(id) {
                Some(entry) if same_record(&entry.current, &current) => match &entry.outcome {
                    None => conflicts.push(Arc::clone(object)),
                    Some(MergeOutcome::Applied) => {}
                    Some(MergeOutcome::Current) => {
                        let fresh = current.create();
                        fresh.assign(&*current)?;
                        merged.push((Arc::clone(object), fresh));
                        reverted.push(*id);
                    }
                    Some(MergeOutcome::Merged(record)) => {
                        merged.push((Arc::clone(object), RecordRef::clone(record)));
                    }
                },
                _ if final_attempt => conflicts.push(Arc::clone(object)),
                _ => stale = true,
            }
        }

        if !conflicts.is_empty() {
            return Ok(Pass::Conflict(conflicts));
        }
        if stale {
            return Ok(Pass::Retry);
        }
        if !merged.is_empty() {
            self.inner.advance_locked(rt, st, &mut state);
            let new_id = self.inner.id();
            for (object, record) in merged {
                record.stamp().set(new_id);
                object.prepend_record(record);
                rt.metrics().increment_records_created();
                rt.metrics().increment_merges_resolved();
                debug!(
                    event = Event::MergeResolved.as_str(),
                    state = object.state_id().value(),
                    snapshot_id = new_id.value(),
                );
            }
        }
        for id in reverted {
            state.modified.remove(&id);
        }
        Ok(Pass::Success)
    }
}

fn global_target(rt: &Runtime, st: &GlobalState) -> Target {
    Target {
        id: st.next_id,
        invalid: st.open.clear(rt.global().id()),
    }
}

fn view_target(inner: &SnapshotInner) -> Target {
    let view = inner.view();
    Target {
        id: view.id(),
        invalid: view.invalid().clone(),
    }
}

/// Maps a `Merged` record that is really one of the inputs back to the
/// outcome it stands for.
fn normalize(
    outcome: MergeOutcome,
    previous: &RecordRef,
    current: &RecordRef,
    applied: &RecordRef,
) -> MergeOutcome {
    match outcome {
        MergeOutcome::Merged(record) if same_record(&record, applied) => MergeOutcome::Applied,
        MergeOutcome::Merged(record) if same_record(&record, current) => MergeOutcome::Current,
        MergeOutcome::Merged(record) if same_record(&record, previous) => {
            let fresh = previous.create();
            match fresh.assign(&**previous) {
                Ok(()) => MergeOutcome::Merged(fresh),
                Err(_) => MergeOutcome::Merged(record),
            }
        }
        other => other,
    }
}
