//! Snapshots
//!
//! A snapshot is an isolated, versioned view over every state object. It
//! is identified by a `SnapshotId` and hides the writes of every snapshot
//! in its invalid set. Mutable snapshots collect the objects they write and
//! publish them with `apply()`, or throw them away with `dispose()`.
//!
//! # Kinds
//!
//! - `Global` - the ambient snapshot outside any transaction; writes land
//!   directly and are published whenever the global snapshot advances
//! - `Readonly` / `NestedReadonly` - views that reject writes
//! - `Mutable` - applies to global state
//! - `NestedMutable` - applies into its parent
//!
//! # Lifecycle
//!
//! `Open -> Applying -> Applied`, `Applying -> Open` on conflict, and
//! `Open -> Disposed`. Terminal states are final; only `status()` remains
//! meaningful.
//!
//! # Locking
//!
//! One global write lock serializes id allocation, the open-snapshot set,
//! writes and applies. Reads never take it. Per-snapshot bookkeeping has
//! its own mutex, always acquired after the global lock and never two at a
//! time.

mod access;
mod apply;
mod current;
mod errors;
mod lifecycle;
mod runtime;

pub use access::{readable, writable, writable_with};
pub(crate) use access::read_record;
pub use apply::ApplyResult;
pub use current::EnterGuard;
pub use errors::{SnapshotError, SnapshotResult};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::SnapshotConfig;
use crate::mvcc::{PinHandle, ReadView, SnapshotId, SnapshotIdSet};
use crate::observability::{Event, MetricsSnapshot};
use crate::observer::{ApplyObserver, ObserverHandle, ReadObserver, WriteObserver};
use crate::state::{StateId, StateObject, StateObjectRef};
use runtime::runtime;

/// Lifecycle state of a snapshot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SnapshotStatus {
    Open,
    Applying,
    Applied,
    Disposed,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Open => "open",
            SnapshotStatus::Applying => "applying",
            SnapshotStatus::Applied => "applied",
            SnapshotStatus::Disposed => "disposed",
        }
    }

    /// True for `Applied` and `Disposed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SnapshotStatus::Applied | SnapshotStatus::Disposed)
    }

    fn to_u8(self) -> u8 {
        match self {
            SnapshotStatus::Open => 0,
            SnapshotStatus::Applying => 1,
            SnapshotStatus::Applied => 2,
            SnapshotStatus::Disposed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SnapshotStatus::Open,
            1 => SnapshotStatus::Applying,
            2 => SnapshotStatus::Applied,
            _ => SnapshotStatus::Disposed,
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a snapshot may do and where it applies to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SnapshotKind {
    Global,
    Readonly,
    NestedReadonly,
    Mutable,
    NestedMutable,
}

impl SnapshotKind {
    pub fn is_read_only(&self) -> bool {
        matches!(self, SnapshotKind::Readonly | SnapshotKind::NestedReadonly)
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, SnapshotKind::NestedReadonly | SnapshotKind::NestedMutable)
    }

    /// Mutable kinds other than the global snapshot.
    pub(crate) fn is_transactional(&self) -> bool {
        matches!(self, SnapshotKind::Mutable | SnapshotKind::NestedMutable)
    }
}

/// Bookkeeping guarded by the per-snapshot mutex.
#[derive(Default)]
pub(crate) struct SnapshotState {
    /// Objects written by this snapshot (or applied into it by children)
    pub(crate) modified: BTreeMap<StateId, StateObjectRef>,
    /// Ids this snapshot held before advancing, plus ids of applied children
    pub(crate) previous_ids: SnapshotIdSet,
    /// Pins inherited from applied children
    pub(crate) previous_pins: Vec<PinHandle>,
    pub(crate) pin: Option<PinHandle>,
    /// Own token plus one per open nested child
    pub(crate) active: usize,
    /// Ids already removed from (or handed over in) the open set
    pub(crate) closed: bool,
}

pub(crate) struct SnapshotInner {
    kind: SnapshotKind,
    parent: Option<Snapshot>,
    view: ArcSwap<ReadView>,
    status: AtomicU8,
    read_observer: Option<ReadObserver>,
    write_observer: Option<WriteObserver>,
    state: Mutex<SnapshotState>,
}

impl SnapshotInner {
    pub(crate) fn new(
        kind: SnapshotKind,
        parent: Option<Snapshot>,
        view: ReadView,
        read_observer: Option<ReadObserver>,
        write_observer: Option<WriteObserver>,
        pin: PinHandle,
    ) -> Self {
        Self {
            kind,
            parent,
            view: ArcSwap::from_pointee(view),
            status: AtomicU8::new(SnapshotStatus::Open.to_u8()),
            read_observer,
            write_observer,
            state: Mutex::new(SnapshotState {
                pin: Some(pin),
                active: 1,
                ..SnapshotState::default()
            }),
        }
    }

    pub(crate) fn status(&self) -> SnapshotStatus {
        SnapshotStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: SnapshotStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Moves `from -> to`, or reports the status that blocked the move.
    pub(crate) fn transition(
        &self,
        from: SnapshotStatus,
        to: SnapshotStatus,
    ) -> Result<(), SnapshotStatus> {
        self.status
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SnapshotStatus::from_u8)
    }

    pub(crate) fn view(&self) -> Arc<ReadView> {
        self.view.load_full()
    }

    pub(crate) fn id(&self) -> SnapshotId {
        self.view.load().id()
    }
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        if self.kind == SnapshotKind::Global || self.status() != SnapshotStatus::Open {
            return;
        }
        tracing::debug!(snapshot_id = self.id().value(), "open snapshot dropped; disposing");
        self.set_status(SnapshotStatus::Disposed);
        let rt = runtime();
        let mut st = rt.lock();
        self.deactivate_locked(rt, &mut st);
        rt.metrics().increment_snapshots_disposed();
    }
}

/// Handle to a snapshot. Cloning shares the snapshot.
///
/// Dropping the last handle of an open, non-global snapshot disposes it.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
    /// Bound to a retired global snapshot rather than the live one
    retired: bool,
}

impl Snapshot {
    pub(crate) fn from_inner(inner: Arc<SnapshotInner>) -> Self {
        Self { inner, retired: false }
    }

    /// Handle to a global snapshot that has been replaced. It keeps the
    /// retired id and view instead of following the live global.
    pub(crate) fn retired_global(inner: Arc<SnapshotInner>) -> Self {
        Self { inner, retired: true }
    }

    /// The process-wide global snapshot.
    pub fn global_snapshot() -> Snapshot {
        Snapshot::from_inner(runtime().global())
    }

    /// The snapshot current on this thread, or the global snapshot.
    pub fn current() -> Snapshot {
        current::thread_snapshot().unwrap_or_else(Snapshot::global_snapshot)
    }

    /// Live inner state; the global handle always resolves to the current global.
    pub(crate) fn resolve(&self) -> Arc<SnapshotInner> {
        if self.inner.kind == SnapshotKind::Global && !self.retired {
            runtime().global()
        } else {
            Arc::clone(&self.inner)
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.resolve().id()
    }

    pub fn kind(&self) -> SnapshotKind {
        self.inner.kind
    }

    pub fn status(&self) -> SnapshotStatus {
        if self.inner.kind == SnapshotKind::Global && !self.retired {
            SnapshotStatus::Open
        } else {
            self.inner.status()
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.kind.is_read_only()
    }

    pub fn parent(&self) -> Option<&Snapshot> {
        self.inner.parent.as_ref()
    }

    /// Outermost ancestor of this snapshot.
    pub fn root(&self) -> Snapshot {
        let mut root = self.clone();
        while let Some(parent) = root.parent().cloned() {
            root = parent;
        }
        root
    }

    /// The `(id, invalid)` window reads currently use.
    pub fn read_view(&self) -> Arc<ReadView> {
        self.resolve().view()
    }

    /// True if this snapshot holds writes not yet applied.
    pub fn has_pending_changes(&self) -> bool {
        !self.resolve().state.lock().modified.is_empty()
    }

    /// Ids of the objects this snapshot has written.
    pub fn modified_ids(&self) -> Vec<StateId> {
        self.resolve().state.lock().modified.keys().copied().collect()
    }

    /// True if both handles refer to the same snapshot.
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.resolve(), &other.resolve())
    }

    /// Readable unless applied or disposed.
    pub(crate) fn ensure_readable(&self) -> SnapshotResult<()> {
        match self.status() {
            SnapshotStatus::Open | SnapshotStatus::Applying => Ok(()),
            status => Err(SnapshotError::NotOpen {
                snapshot: self.inner.id(),
                status,
            }),
        }
    }

    /// Open and not being applied.
    pub(crate) fn ensure_open(&self) -> SnapshotResult<()> {
        match self.status() {
            SnapshotStatus::Open => Ok(()),
            SnapshotStatus::Applying => Err(SnapshotError::ApplyInProgress {
                snapshot: self.inner.id(),
            }),
            status => Err(SnapshotError::NotOpen {
                snapshot: self.inner.id(),
                status,
            }),
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("status", &self.status())
            .finish()
    }
}

// ==================== Entry points ====================

/// Takes a snapshot nested in the current one.
///
/// A write observer passed for a read-only snapshot is ignored.
pub fn take_snapshot(
    read_only: bool,
    read_observer: Option<ReadObserver>,
    write_observer: Option<WriteObserver>,
) -> SnapshotResult<Snapshot> {
    let current = Snapshot::current();
    if read_only {
        current.take_nested_snapshot(read_observer)
    } else {
        current.take_nested_mutable_snapshot(read_observer, write_observer)
    }
}

/// Read-only snapshot of the current state.
pub fn take_readonly_snapshot(read_observer: Option<ReadObserver>) -> SnapshotResult<Snapshot> {
    take_snapshot(true, read_observer, None)
}

/// Mutable snapshot nested in the current one.
pub fn take_mutable_snapshot(
    read_observer: Option<ReadObserver>,
    write_observer: Option<WriteObserver>,
) -> SnapshotResult<Snapshot> {
    take_snapshot(false, read_observer, write_observer)
}

/// Runs `block` in a fresh mutable snapshot and applies it.
///
/// On conflict the snapshot is disposed and `ApplyConflict` is returned.
pub fn with_mutable_snapshot<R>(block: impl FnOnce() -> R) -> SnapshotResult<R> {
    let snapshot = take_mutable_snapshot(None, None)?;
    let result = match snapshot.enter(block) {
        Ok(result) => result,
        Err(err) => {
            snapshot.dispose()?;
            return Err(err);
        }
    };
    snapshot.apply_or_dispose()?;
    Ok(result)
}

/// Registers a callback for every successful apply.
///
/// The global snapshot is advanced first, so the observer never sees
/// changes made before registration.
pub fn register_apply_observer(
    observer: impl Fn(&crate::observer::ChangeSet, &Snapshot) + Send + Sync + 'static,
) -> ObserverHandle {
    let rt = runtime();
    rt.advance_global();
    let observer: ApplyObserver = Arc::new(observer);
    let id = rt.apply_observers.register(observer);
    ObserverHandle::new(move || {
        runtime().apply_observers.unregister(id);
    })
}

/// Registers a callback for every write made through the global snapshot.
pub fn register_global_write_observer(
    observer: impl Fn(&dyn StateObject, bool) + Send + Sync + 'static,
) -> ObserverHandle {
    let rt = runtime();
    let observer: WriteObserver = Arc::new(observer);
    let id = rt.global_write_observers.register(observer);
    rt.advance_global();
    ObserverHandle::new(move || {
        runtime().global_write_observers.unregister(id);
    })
}

/// Registers a callback for every read made through the global snapshot.
pub fn register_global_read_observer(
    observer: impl Fn(&dyn StateObject) + Send + Sync + 'static,
) -> ObserverHandle {
    let observer: ReadObserver = Arc::new(observer);
    let id = runtime().global_read_observers.register(observer);
    ObserverHandle::new(move || {
        runtime().global_read_observers.unregister(id);
    })
}

/// Publishes pending global writes and notifies apply observers.
///
/// Does nothing when the global snapshot has no pending writes.
pub fn send_apply_notifications() {
    let rt = runtime();
    if rt.global().state.lock().modified.is_empty() {
        return;
    }
    rt.advance_global();
}

/// Marks objects created so far in the current snapshot as initialized.
///
/// Later writes to them count as modifications.
pub fn notify_objects_initialized() -> SnapshotResult<()> {
    Snapshot::current().notify_objects_initialized()
}

/// Installs a runtime configuration for subsequent operations.
pub fn configure(config: SnapshotConfig) -> Result<(), crate::config::ConfigError> {
    config.validate()?;
    tracing::debug!(event = Event::ConfigInstalled.as_str(), ?config);
    runtime().set_config(config);
    Ok(())
}

/// The configuration currently in effect.
pub fn config() -> SnapshotConfig {
    (*runtime().config()).clone()
}

/// Process-wide counters.
pub fn metrics() -> MetricsSnapshot {
    runtime().metrics().snapshot()
}

/// Process-wide counters as JSON.
pub fn metrics_json() -> String {
    runtime().metrics().to_json()
}

/// The next id the runtime will allocate. Strictly increasing.
pub fn global_version() -> SnapshotId {
    runtime().version()
}

/// Number of snapshot ids currently in the open set.
pub fn open_snapshot_count() -> usize {
    runtime().lock().open.len()
}
