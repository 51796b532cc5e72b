//! Thread-bound current snapshot
//!
//! Each thread may have one current snapshot; reads and writes that do not
//! name a snapshot use it, falling back to the global snapshot. Entering is
//! scoped by `EnterGuard`, which restores the previous binding on drop,
//! including during unwinding.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use super::{Snapshot, SnapshotError, SnapshotKind, SnapshotResult};
use crate::observer::{merge_read_observers, merge_write_observers, ReadObserver, WriteObserver};

thread_local! {
    static CURRENT: RefCell<Option<Snapshot>> = const { RefCell::new(None) };
    static OBSERVATION: RefCell<Option<ObservationScope>> = const { RefCell::new(None) };
}

/// Extra observation layered over one snapshot on this thread by
/// `Snapshot::observe` and `Snapshot::without_read_observation`.
#[derive(Clone)]
pub(crate) struct ObservationScope {
    target: Snapshot,
    pub(crate) read_observer: Option<ReadObserver>,
    pub(crate) write_observer: Option<WriteObserver>,
    /// The target's own read observers, and the global ones, stay silent
    pub(crate) reads_suppressed: bool,
}

/// The observation scope covering `snapshot`, if this thread has one.
pub(crate) fn observation_for(snapshot: &Snapshot) -> Option<ObservationScope> {
    OBSERVATION
        .try_with(|scope| scope.borrow().clone())
        .ok()
        .flatten()
        .filter(|scope| scope.target.ptr_eq(snapshot))
}

fn replace_observation(next: Option<ObservationScope>) -> Option<ObservationScope> {
    OBSERVATION.try_with(|scope| scope.replace(next)).ok().flatten()
}

/// Restores the enclosing observation scope when dropped.
struct ObservationGuard {
    previous: Option<ObservationScope>,
}

impl Drop for ObservationGuard {
    fn drop(&mut self) {
        drop(replace_observation(self.previous.take()));
    }
}

fn with_observation<R>(scope: ObservationScope, block: impl FnOnce() -> R) -> R {
    let _guard = ObservationGuard {
        previous: replace_observation(Some(scope)),
    };
    block()
}

pub(crate) fn thread_snapshot() -> Option<Snapshot> {
    CURRENT.try_with(|current| current.borrow().clone()).ok().flatten()
}

/// Replaces this thread's binding and returns the old one. The caller drops
/// it, outside the `RefCell` borrow.
fn replace_thread_snapshot(next: Option<Snapshot>) -> Option<Snapshot> {
    CURRENT.try_with(|current| current.replace(next)).ok().flatten()
}

/// Rebinds the thread to the parent of `snapshot` if `snapshot` is current.
pub(crate) fn release_if_current(snapshot: &Snapshot) {
    let is_current = thread_snapshot().is_some_and(|current| current.ptr_eq(snapshot));
    if is_current {
        let parent = snapshot.parent().filter(|p| p.kind() != SnapshotKind::Global).cloned();
        drop(replace_thread_snapshot(parent));
    }
}

/// Restores the previously current snapshot when dropped.
#[must_use = "the snapshot stops being current when the guard is dropped"]
pub struct EnterGuard {
    previous: Option<Snapshot>,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        drop(replace_thread_snapshot(self.previous.take()));
    }
}

impl std::fmt::Debug for EnterGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnterGuard").field("previous", &self.previous).finish()
    }
}

fn binding_for(snapshot: &Snapshot) -> Option<Snapshot> {
    if snapshot.kind() == SnapshotKind::Global {
        None
    } else {
        Some(snapshot.clone())
    }
}

impl Snapshot {
    /// Runs `block` with this snapshot current on the calling thread.
    pub fn enter<R>(&self, block: impl FnOnce() -> R) -> SnapshotResult<R> {
        let _guard = self.make_current()?;
        Ok(block())
    }

    /// Makes this snapshot current until the guard is dropped.
    pub fn make_current(&self) -> SnapshotResult<EnterGuard> {
        self.ensure_open()?;
        let previous = replace_thread_snapshot(binding_for(self));
        Ok(EnterGuard {
            previous,
            _not_send: PhantomData,
        })
    }

    /// Makes this snapshot current without a guard.
    ///
    /// Returns the previous binding, to be handed back to `leave_unscoped`.
    pub fn enter_unscoped(&self) -> SnapshotResult<Option<Snapshot>> {
        self.ensure_open()?;
        Ok(replace_thread_snapshot(binding_for(self)))
    }

    /// Undoes `enter_unscoped`.
    pub fn leave_unscoped(&self, previous: Option<Snapshot>) -> SnapshotResult<()> {
        let is_current = match thread_snapshot() {
            Some(current) => current.ptr_eq(self),
            None => self.kind() == SnapshotKind::Global,
        };
        if !is_current {
            return Err(SnapshotError::NotCurrent { snapshot: self.id() });
        }
        drop(replace_thread_snapshot(previous));
        Ok(())
    }

    /// Runs `block` with extra read and write observers on the current
    /// snapshot of this thread.
    ///
    /// The observers see reads and writes made through the current snapshot
    /// and are inherited by snapshots taken from it inside `block`.
    /// Snapshots taken before the call are unaffected, even if entered.
    pub fn observe<R>(
        read_observer: Option<ReadObserver>,
        write_observer: Option<WriteObserver>,
        block: impl FnOnce() -> R,
    ) -> R {
        if read_observer.is_none() && write_observer.is_none() {
            return block();
        }
        let target = Snapshot::current();
        let enclosing = observation_for(&target);
        let scope = ObservationScope {
            read_observer: merge_read_observers(
                read_observer,
                enclosing.as_ref().and_then(|s| s.read_observer.clone()),
            ),
            write_observer: merge_write_observers(
                write_observer,
                enclosing.as_ref().and_then(|s| s.write_observer.clone()),
            ),
            reads_suppressed: enclosing.is_some_and(|s| s.reads_suppressed),
            target,
        };
        with_observation(scope, block)
    }

    /// Runs `block` with every read observer of the current snapshot
    /// silenced. Write observers still run.
    pub fn without_read_observation<R>(block: impl FnOnce() -> R) -> R {
        let target = Snapshot::current();
        let write_observer = observation_for(&target).and_then(|s| s.write_observer);
        let scope = ObservationScope {
            target,
            read_observer: None,
            write_observer,
            reads_suppressed: true,
        };
        with_observation(scope, block)
    }

    /// Runs `block` against the global snapshot, whatever is current.
    pub fn global<R>(block: impl FnOnce() -> R) -> R {
        let _guard = EnterGuard {
            previous: replace_thread_snapshot(None),
            _not_send: PhantomData,
        };
        block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::take_readonly_snapshot;

    #[test]
    fn test_enter_restores_previous_binding() {
        let snapshot = take_readonly_snapshot(None).unwrap();
        let id = snapshot.enter(|| Snapshot::current().id()).unwrap();
        assert_eq!(id, snapshot.id());
        assert_eq!(Snapshot::current().kind(), SnapshotKind::Global);
        snapshot.dispose().unwrap();
    }

    #[test]
    fn test_enter_restores_binding_on_panic() {
        let snapshot = take_readonly_snapshot(None).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            snapshot.enter(|| panic!("boom")).unwrap();
        }));
        assert!(result.is_err());
        assert_eq!(Snapshot::current().kind(), SnapshotKind::Global);
        snapshot.dispose().unwrap();
    }

    #[test]
    fn test_leave_unscoped_requires_current() {
        let a = take_readonly_snapshot(None).unwrap();
        let b = take_readonly_snapshot(None).unwrap();
        let previous = a.enter_unscoped().unwrap();
        let err = b.leave_unscoped(None).unwrap_err();
        assert!(matches!(err, SnapshotError::NotCurrent { .. }));
        a.leave_unscoped(previous).unwrap();
        assert_eq!(Snapshot::current().kind(), SnapshotKind::Global);
        a.dispose().unwrap();
        b.dispose().unwrap();
    }

    #[test]
    fn test_global_block_ignores_current() {
        let snapshot = take_readonly_snapshot(None).unwrap();
        let kind = snapshot
            .enter(|| Snapshot::global(|| Snapshot::current().kind()))
            .unwrap();
        assert_eq!(kind, SnapshotKind::Global);
        snapshot.dispose().unwrap();
    }

    #[test]
    fn test_disposing_current_rebinds_to_parent() {
        let snapshot = take_readonly_snapshot(None).unwrap();
        let previous = snapshot.enter_unscoped().unwrap();
        snapshot.dispose().unwrap();
        assert_eq!(Snapshot::current().kind(), SnapshotKind::Global);
        drop(previous);
    }

    #[test]
    fn test_observation_scope_is_restored() {
        let snapshot = take_readonly_snapshot(None).unwrap();
        let observer: ReadObserver = std::sync::Arc::new(|_: &dyn crate::state::StateObject| {});
        snapshot
            .enter(|| {
                Snapshot::observe(Some(observer), None, || {
                    let current = Snapshot::current();
                    assert!(observation_for(&current).is_some());
                    Snapshot::without_read_observation(|| {
                        let scope = observation_for(&current).unwrap();
                        assert!(scope.reads_suppressed);
                        assert!(scope.read_observer.is_none());
                    });
                    assert!(!observation_for(&current).unwrap().reads_suppressed);
                });
                assert!(observation_for(&Snapshot::current()).is_none());
            })
            .unwrap();
        assert!(observation_for(&Snapshot::global_snapshot()).is_none());
        snapshot.dispose().unwrap();
    }

    #[test]
    fn test_cannot_enter_disposed_snapshot() {
        let snapshot = take_readonly_snapshot(None).unwrap();
        snapshot.dispose().unwrap();
        assert!(snapshot.enter(|| ()).is_err());
    }
}
