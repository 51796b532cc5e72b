//! Metrics registry for the snapshot runtime
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry of operational counters
///
/// # Thread Safety
///
/// All counters use atomic operations for thread-safe increments.
/// Uses Relaxed ordering for minimal overhead (eventual consistency is fine for metrics).
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Snapshots taken (every kind except global)
    snapshots_taken: AtomicU64,
    /// Successful applies
    snapshots_applied: AtomicU64,
    /// Snapshots disposed without applying
    snapshots_disposed: AtomicU64,
    /// Applies rejected with a conflict
    apply_conflicts: AtomicU64,
    /// Concurrent writes resolved by a merge policy
    merges_resolved: AtomicU64,
    /// Records allocated by writes
    records_created: AtomicU64,
    /// Records reused in place by writes
    records_reused: AtomicU64,
    /// Records removed by trimming
    records_trimmed: AtomicU64,
    /// Global snapshot replacements
    global_advances: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Snapshot lifecycle

    pub fn increment_snapshots_taken(&self) {
        self.snapshots_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_snapshots_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_snapshots_disposed(&self) {
        self.snapshots_disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_apply_conflicts(&self) {
        self.apply_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_merges_resolved(&self) {
        self.merges_resolved.fetch_add(1, Ordering::Relaxed);
    }

    // Records

    pub fn increment_records_created(&self) {
        self.records_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_records_reused(&self) {
        self.records_reused.fetch_add(1, Ordering::Relaxed);
    }

    /// Add trimmed record count
    pub fn add_records_trimmed(&self, count: u64) {
        self.records_trimmed.fetch_add(count, Ordering::Relaxed);
    }

    // Global state

    pub fn increment_global_advances(&self) {
        self.global_advances.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshots taken
    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken.load(Ordering::Relaxed)
    }

    /// Get apply conflicts
    pub fn apply_conflicts(&self) -> u64 {
        self.apply_conflicts.load(Ordering::Relaxed)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            snapshots_taken: self.snapshots_taken.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied.load(Ordering::Relaxed),
            snapshots_disposed: self.snapshots_disposed.load(Ordering::Relaxed),
            apply_conflicts: self.apply_conflicts.load(Ordering::Relaxed),
            merges_resolved: self.merges_resolved.load(Ordering::Relaxed),
            records_created: self.records_created.load(Ordering::Relaxed),
            records_reused: self.records_reused.load(Ordering::Relaxed),
            records_trimmed: self.records_trimmed.load(Ordering::Relaxed),
            global_advances: self.global_advances.load(Ordering::Relaxed),
        }
    }

    /// Get current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        // A struct of plain integers always serializes.
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub snapshots_taken: u64,
    pub snapshots_applied: u64,
    pub snapshots_disposed: u64,
    pub apply_conflicts: u64,
    pub merges_resolved: u64,
    pub records_created: u64,
    pub records_reused: u64,
    pub records_trimmed: u64,
    pub global_advances: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let registry = MetricsRegistry::new();
        let snapshot = registry.snapshot();

        assert_eq!(snapshot.snapshots_taken, 0);
        assert_eq!(snapshot.apply_conflicts, 0);
        assert_eq!(snapshot.records_created, 0);
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_snapshots_taken();
        registry.increment_snapshots_taken();
        registry.increment_snapshots_applied();
        registry.increment_snapshots_disposed();
        registry.increment_apply_conflicts();
        registry.increment_merges_resolved();
        registry.increment_records_created();
        registry.increment_records_reused();
        registry.add_records_trimmed(3);
        registry.increment_global_advances();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.snapshots_taken, 2);
        assert_eq!(snapshot.snapshots_applied, 1);
        assert_eq!(snapshot.snapshots_disposed, 1);
        assert_eq!(snapshot.apply_conflicts, 1);
        assert_eq!(snapshot.merges_resolved, 1);
        assert_eq!(snapshot.records_created, 1);
        assert_eq!(snapshot.records_reused, 1);
        assert_eq!(snapshot.records_trimmed, 3);
        assert_eq!(snapshot.global_advances, 1);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.add_records_trimmed(12);
        registry.increment_apply_conflicts();

        let json = registry.to_json();

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["records_trimmed"], 12);
        assert_eq!(parsed["apply_conflicts"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let reg = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    reg.increment_records_created();
                    reg.increment_snapshots_taken();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.records_created, 1000);
        assert_eq!(snapshot.snapshots_taken, 1000);
    }
}
