//! SnapshotId - Totally ordered snapshot identity
//!
//! Every snapshot (global, read-only, mutable, nested) receives a fresh id at
//! creation, and every record is stamped with the id of the snapshot that
//! wrote it.
//!
//! - Ids are allocated from a single process-wide counter
//! - Ordering reflects creation order, not apply order
//! - `INVALID_SNAPSHOT` (0) is never allocated and marks abandoned records
//! - The first global snapshot is `FIRST_SNAPSHOT` (1)

use std::fmt;

/// A totally ordered snapshot identity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SnapshotId(u64);

/// Stamp given to records whose snapshot was discarded.
///
/// No snapshot considers such a record valid, so it may be reused at once.
pub const INVALID_SNAPSHOT: SnapshotId = SnapshotId(0);

/// Id of the first global snapshot.
pub const FIRST_SNAPSHOT: SnapshotId = SnapshotId(1);

/// Stamp carried by a record while it is being written.
///
/// It is larger than any allocatable id, so no reader treats it as valid.
pub(crate) const UNDER_CONSTRUCTION: SnapshotId = SnapshotId(u64::MAX);

impl SnapshotId {
    /// Creates a new SnapshotId with the given value.
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns true for the abandoned-record marker.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.0 == INVALID_SNAPSHOT.0
    }

    /// The id directly after this one.
    #[inline]
    pub(crate) fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The id directly before this one, saturating at zero.
    #[inline]
    pub(crate) fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
