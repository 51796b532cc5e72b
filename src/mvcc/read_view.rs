//! ReadView - the version window of one snapshot
//!
//! A read view is everything a reader needs to pick a record: the
//! snapshot's id and its invalid set. Snapshots publish their current view
//! through an atomic pointer; a reader loads it once per read and then
//! works on an immutable value.
//!
//! This is a PURE TYPE with NO behavior beyond construction and access.

use super::{SnapshotId, SnapshotIdSet};

/// Immutable `(id, invalid set)` pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadView {
    id: SnapshotId,
    invalid: SnapshotIdSet,
}

impl ReadView {
    #[inline]
    pub fn new(id: SnapshotId, invalid: SnapshotIdSet) -> Self {
        Self { id, invalid }
    }

    /// Highest id this view may observe.
    #[inline]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Ids whose writes are hidden from this view.
    #[inline]
    pub fn invalid(&self) -> &SnapshotIdSet {
        &self.invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_view_accessors() {
        let invalid = SnapshotIdSet::new().set(SnapshotId::new(3));
        let view = ReadView::new(SnapshotId::new(5), invalid.clone());
        assert_eq!(view.id(), SnapshotId::new(5));
        assert_eq!(view.invalid(), &invalid);
    }

    #[test]
    fn test_read_view_equality() {
        let a = ReadView::new(SnapshotId::new(1), SnapshotIdSet::new());
        let b = ReadView::new(SnapshotId::new(1), SnapshotIdSet::new());
        let c = ReadView::new(SnapshotId::new(2), SnapshotIdSet::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
