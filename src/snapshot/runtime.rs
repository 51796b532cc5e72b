//! Process-wide snapshot runtime
//!
//! Owns the global write lock and everything it guards: the id counter,
//! the open-snapshot set and the pinning table. The current global snapshot
//! and the configuration are published through `ArcSwap` so readers never
//! take the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::{Snapshot, SnapshotInner, SnapshotKind, SnapshotStatus};
use crate::config::SnapshotConfig;
use crate::mvcc::{
    PinningTable, ReadView, SnapshotId, SnapshotIdSet, Visibility, FIRST_SNAPSHOT,
};
use crate::observability::{Event, MetricsRegistry};
use crate::observer::{ChangeSet, ObserverRegistry};
use crate::state::{StateObject, StateObjectRef};

/// State guarded by the global write lock.
pub(crate) struct GlobalState {
    pub(crate) next_id: SnapshotId,
    pub(crate) open: SnapshotIdSet,
    pub(crate) pinning: PinningTable,
}

pub(crate) struct Runtime {
    lock: Mutex<GlobalState>,
    /// Mirror of `next_id` for lock-free `global_version()`
    version: AtomicU64,
    global: ArcSwap<SnapshotInner>,
    pub(crate) apply_observers: ObserverRegistry<dyn Fn(&ChangeSet, &Snapshot) + Send + Sync>,
    pub(crate) global_read_observers: ObserverRegistry<dyn Fn(&dyn StateObject) + Send + Sync>,
    pub(crate) global_write_observers:
        ObserverRegistry<dyn Fn(&dyn StateObject, bool) + Send + Sync>,
    config: ArcSwap<SnapshotConfig>,
    metrics: MetricsRegistry,
}

static RUNTIME: Lazy<Runtime> = Lazy::new(Runtime::new);

pub(crate) fn runtime() -> &'static Runtime {
    &RUNTIME
}

impl Runtime {
    fn new() -> Self {
        let mut pinning = PinningTable::new();
        let pin = pinning.pin(FIRST_SNAPSHOT);
        let global = SnapshotInner::new(
            SnapshotKind::Global,
            None,
            ReadView::new(FIRST_SNAPSHOT, SnapshotIdSet::EMPTY),
            None,
            None,
            pin,
        );
        let next_id = FIRST_SNAPSHOT.next();
        Self {
            lock: Mutex::new(GlobalState {
                next_id,
                open: SnapshotIdSet::EMPTY.set(FIRST_SNAPSHOT),
                pinning,
            }),
            version: AtomicU64::new(next_id.value()),
            global: ArcSwap::from_pointee(global),
            apply_observers: ObserverRegistry::new(),
            global_read_observers: ObserverRegistry::new(),
            global_write_observers: ObserverRegistry::new(),
            config: ArcSwap::from_pointee(SnapshotConfig::default()),
            metrics: MetricsRegistry::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GlobalState> {
        self.lock.lock()
    }

    pub(crate) fn global(&self) -> Arc<SnapshotInner> {
        self.global.load_full()
    }

    pub(crate) fn version(&self) -> SnapshotId {
        SnapshotId::new(self.version.load(Ordering::Acquire))
    }

    pub(crate) fn config(&self) -> Arc<SnapshotConfig> {
        self.config.load_full()
    }

    pub(crate) fn set_config(&self, config: SnapshotConfig) {
        self.config.store(Arc::new(config));
    }

    pub(crate) fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Hands out the next id. Ids are never reused.
    pub(crate) fn allocate_id(&self, st: &mut GlobalState) -> SnapshotId {
        let id = st.next_id;
        st.next_id = id.next();
        self.version.store(st.next_id.value(), Ordering::Release);
        id
    }

    /// Records with an id at or below this are hidden from no open snapshot.
    pub(crate) fn reuse_limit(&self, st: &GlobalState) -> SnapshotId {
        st.pinning.lowest_or(st.next_id).prev()
    }

    /// Replaces the global snapshot with a fresh one.
    ///
    /// Returns the retired global and the writes it carried; callers notify
    /// apply observers with them after releasing the lock, and drop the
    /// retired snapshot only then.
    pub(crate) fn advance_global_locked(
        &self,
        st: &mut GlobalState,
    ) -> (Arc<SnapshotInner>, ChangeSet) {
        let previous = self.global.load_full();
        st.open = st.open.clear(previous.id());
        let id = self.allocate_id(st);
        let invalid = st.open.clone();
        let pin = st.pinning.pin(invalid.lowest(id));
        let next = SnapshotInner::new(
            SnapshotKind::Global,
            None,
            ReadView::new(id, invalid),
            None,
            None,
            pin,
        );
        st.open = st.open.set(id);
        self.global.store(Arc::new(next));

        previous.set_status(SnapshotStatus::Disposed);
        let changes = {
            let mut state = previous.state.lock();
            if let Some(pin) = state.pin.take() {
                st.pinning.release(pin);
            }
            state.closed = true;
            ChangeSet::from_map(std::mem::take(&mut state.modified))
        };
        self.metrics.increment_global_advances();
        trace!(
            event = Event::GlobalAdvanced.as_str(),
            from = previous.id().value(),
            to = id.value(),
            changed = changes.len(),
        );
        (previous, changes)
    }

    /// Advances the global snapshot and notifies apply observers.
    pub(crate) fn advance_global(&self) {
        let (previous, changes) = {
            let mut st = self.lock();
            self.advance_global_locked(&mut st)
        };
        self.notify_apply(&changes, &Snapshot::retired_global(previous));
    }

    /// Runs apply observers registered at the time of the call.
    pub(crate) fn notify_apply(&self, changes: &ChangeSet, snapshot: &Snapshot) {
        if changes.is_empty() {
            return;
        }
        for observer in self.apply_observers.load() {
            observer(changes, snapshot);
        }
    }

    /// Compacts the chains of `objects` when trimming is enabled.
    pub(crate) fn trim_locked<'a>(
        &self,
        st: &GlobalState,
        objects: impl Iterator<Item = &'a StateObjectRef>,
    ) {
        if self.config().trim_records {
            self.trim_chains_locked(st, objects);
        }
    }

    /// Compacts the chains of `objects`, returning the number of records dropped.
    pub(crate) fn trim_chains_locked<'a>(
        &self,
        st: &GlobalState,
        objects: impl Iterator<Item = &'a StateObjectRef>,
    ) -> usize {
        let limit = self.reuse_limit(st);
        let removed: usize = objects.map(|o| Visibility::trim(o.records(), limit)).sum();
        if removed > 0 {
            self.metrics.add_records_trimmed(removed as u64);
            debug!(event = Event::RecordsTrimmed.as_str(), removed, limit = limit.value());
        }
        removed
    }
}
