//! Copy-on-write observer registry and its disposal handle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// Ordered list of observers of one kind.
pub(crate) struct ObserverRegistry<F: ?Sized> {
    entries: ArcSwap<Vec<(u64, Arc<F>)>>,
    next_id: AtomicU64,
    /// Serializes writers; readers only load `entries`.
    write: Mutex<()>,
}

impl<F: ?Sized> ObserverRegistry<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
            write: Mutex::new(()),
        }
    }

    pub(crate) fn register(&self, observer: Arc<F>) -> u64 {
        let _guard = self.write.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut next: Vec<(u64, Arc<F>)> = self.entries.load().iter().cloned().collect();
        next.push((id, observer));
        self.entries.store(Arc::new(next));
        id
    }

    /// Returns false if `id` was not registered.
    pub(crate) fn unregister(&self, id: u64) -> bool {
        let _guard = self.write.lock();
        let current = self.entries.load_full();
        if !current.iter().any(|(entry, _)| *entry == id) {
            return false;
        }
        let next: Vec<(u64, Arc<F>)> = current
            .iter()
            .filter(|(entry, _)| *entry != id)
            .cloned()
            .collect();
        self.entries.store(Arc::new(next));
        true
    }

    /// Observers registered at the time of the call, in registration order.
    pub(crate) fn load(&self) -> Vec<Arc<F>> {
        self.entries.load().iter().map(|(_, f)| Arc::clone(f)).collect()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }
}

/// Keeps an observer registered.
///
/// Dropping the handle, or calling `dispose`, removes the observer. It is
/// safe to do either from inside the observer's own callback.
#[must_use = "dropping the handle unregisters the observer"]
pub struct ObserverHandle {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl ObserverHandle {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Unregisters the observer.
    pub fn dispose(mut self) {
        self.release();
    }

    /// Keeps the observer registered for the rest of the process.
    pub fn forget(mut self) {
        self.remove = None;
    }

    fn release(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Callback = dyn Fn(u32) -> u32 + Send + Sync;

    #[test]
    fn test_register_preserves_order() {
        let registry: ObserverRegistry<Callback> = ObserverRegistry::new();
        registry.register(Arc::new(|x: u32| x + 1));
        registry.register(Arc::new(|x: u32| x * 10));
        let results: Vec<u32> = registry.load().iter().map(|f| f(2)).collect();
        assert_eq!(results, vec![3, 20]);
    }

    #[test]
    fn test_unregister_removes_only_target() {
        let registry: ObserverRegistry<Callback> = ObserverRegistry::new();
        let a = registry.register(Arc::new(|x: u32| x));
        registry.register(Arc::new(|x: u32| x));
        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_loaded_list_is_stable_during_removal() {
        let registry: ObserverRegistry<Callback> = ObserverRegistry::new();
        let a = registry.register(Arc::new(|x: u32| x));
        let pass = registry.load();
        registry.unregister(a);
        assert_eq!(pass.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_drop_runs_remover_once() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = ObserverHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forgotten_handle_keeps_observer() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        ObserverHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .forget();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
