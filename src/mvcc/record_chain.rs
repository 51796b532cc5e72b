//! RecordChain - per-object history of records
//!
//! The chain is a newest-first vector of record handles published through
//! an `ArcSwap`. Readers take a lock-free snapshot of the vector and walk
//! it; writers (serialized by the global write lock) publish a new vector
//! on prepend or trim. A reader holding an old vector keeps its records
//! alive, so compaction never invalidates an in-progress walk.
//!
//! Invariants:
//! - The chain is never empty
//! - Index 0 is the most recently prepended record
//! - The last element is the oldest surviving record

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::record::RecordRef;

/// Newest-first chain of records owned by one state object.
pub struct RecordChain {
    records: ArcSwap<Vec<RecordRef>>,
}

impl RecordChain {
    /// Creates a chain holding only `initial`.
    pub fn new(initial: RecordRef) -> Self {
        Self {
            records: ArcSwap::from_pointee(vec![initial]),
        }
    }

    /// Newest record.
    pub fn first(&self) -> RecordRef {
        Arc::clone(&self.records.load()[0])
    }

    /// Oldest surviving record.
    pub fn oldest(&self) -> RecordRef {
        let records = self.records.load();
        Arc::clone(&records[records.len() - 1])
    }

    /// Lock-free view of the whole chain, newest first.
    pub fn load(&self) -> Arc<Vec<RecordRef>> {
        self.records.load_full()
    }

    pub fn len(&self) -> usize {
        self.records.load().len()
    }

    /// Always false; a chain holds at least its initial record.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Makes `record` the new head.
    pub(crate) fn prepend(&self, record: RecordRef) {
        self.records.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.push(Arc::clone(&record));
            next.extend(current.iter().cloned());
            next
        });
    }

    /// Drops every record for which `keep` returns false.
    ///
    /// The head always survives. Returns the number of records removed.
    pub(crate) fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&RecordRef) -> bool,
    {
        let current = self.records.load_full();
        let next: Vec<RecordRef> = current
            .iter()
            .enumerate()
            .filter(|(index, record)| *index == 0 || keep(record))
            .map(|(_, record)| Arc::clone(record))
            .collect();
        let removed = current.len() - next.len();
        if removed > 0 {
            self.records.store(Arc::new(next));
        }
        removed
    }
}

impl fmt::Debug for RecordChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.records.load().iter().map(|r| r.snapshot_id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::{same_record, SnapshotId, ValueRecord};

    fn record(id: u64) -> RecordRef {
        Arc::new(ValueRecord::new(SnapshotId::new(id), id))
    }

    #[test]
    fn test_new_chain_has_single_record() {
        let initial = record(1);
        let chain = RecordChain::new(Arc::clone(&initial));
        assert_eq!(chain.len(), 1);
        assert!(same_record(&chain.first(), &initial));
        assert!(same_record(&chain.oldest(), &initial));
    }

    #[test]
    fn test_prepend_makes_new_head() {
        let chain = RecordChain::new(record(1));
        let newer = record(2);
        chain.prepend(Arc::clone(&newer));
        assert_eq!(chain.len(), 2);
        assert!(same_record(&chain.first(), &newer));
        assert_eq!(chain.oldest().snapshot_id(), SnapshotId::new(1));
    }

    #[test]
    fn test_loaded_view_survives_prepend() {
        let chain = RecordChain::new(record(1));
        let view = chain.load();
        chain.prepend(record(2));
        assert_eq!(view.len(), 1);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_retain_never_drops_head() {
        let chain = RecordChain::new(record(1));
        chain.prepend(record(2));
        chain.prepend(record(3));
        let removed = chain.retain(|_| false);
        assert_eq!(removed, 2);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.first().snapshot_id(), SnapshotId::new(3));
    }

    #[test]
    fn test_debug_lists_stamps() {
        let chain = RecordChain::new(record(1));
        chain.prepend(record(4));
        assert_eq!(format!("{:?}", chain), "[SnapshotId(4), SnapshotId(1)]");
    }
}
