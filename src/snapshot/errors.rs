//! # Snapshot Errors
//!
//! Protocol misuse is reported as an error at the call site. Apply
//! conflicts are expected in concurrent use and come back from `apply()` as
//! `ApplyResult::Failure`; they only become `ApplyConflict` errors when a
//! caller asks for that via `ApplyResult::check`.

use thiserror::Error;

use super::SnapshotStatus;
use crate::mvcc::SnapshotId;
use crate::state::StateId;

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Snapshot errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    // ==================
    // Illegal State
    // ==================
    /// Write attempted through a read-only snapshot
    #[error("Cannot modify a state object in read-only snapshot {snapshot}")]
    ReadOnlySnapshot { snapshot: SnapshotId },

    /// Operation on a snapshot that is no longer open
    #[error("Snapshot {snapshot} is not open (status: {status})")]
    NotOpen {
        snapshot: SnapshotId,
        status: SnapshotStatus,
    },

    /// Second apply, or apply after dispose
    #[error("Snapshot {snapshot} was already applied")]
    AlreadyApplied { snapshot: SnapshotId },

    /// Second dispose, or dispose after apply
    #[error("Snapshot {snapshot} was already disposed")]
    AlreadyDisposed { snapshot: SnapshotId },

    /// Apply or dispose raced with an apply in progress
    #[error("Snapshot {snapshot} is being applied")]
    ApplyInProgress { snapshot: SnapshotId },

    /// The global snapshot is advanced, never applied
    #[error("Cannot apply the global snapshot directly")]
    GlobalApply,

    /// The global snapshot lives for the whole process
    #[error("Cannot dispose the global snapshot")]
    GlobalDispose,

    /// Nested apply after the parent closed
    #[error("Cannot apply nested snapshot {snapshot}: parent {parent} is not open")]
    ParentNotOpen {
        snapshot: SnapshotId,
        parent: SnapshotId,
    },

    /// Mutable snapshot requested from a read-only one
    #[error("Cannot take a mutable snapshot from read-only snapshot {parent}")]
    ReadOnlyParent { parent: SnapshotId },

    /// `leave` on a snapshot that is not current on this thread
    #[error("Snapshot {snapshot} is not the current snapshot")]
    NotCurrent { snapshot: SnapshotId },

    // ==================
    // Invariant Violations
    // ==================
    /// No record of the state object is visible to the snapshot
    #[error(
        "Reading state {state} from snapshot {snapshot}: it was created after the snapshot \
         was taken or in a snapshot that has not yet been applied"
    )]
    NoVisibleRecord { state: StateId, snapshot: SnapshotId },

    /// A record was assigned from a record of another concrete kind
    #[error("Record kind mismatch: expected {expected}")]
    RecordKindMismatch { expected: &'static str },

    // ==================
    // Conflicts
    // ==================
    /// Apply failed because other snapshots wrote the same objects
    #[error("Snapshot {snapshot} conflicts on {} state object(s)", conflicting.len())]
    ApplyConflict {
        snapshot: SnapshotId,
        conflicting: Vec<StateId>,
    },
}

impl SnapshotError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadOnlySnapshot { .. } => "SNAP_READ_ONLY",
            Self::NotOpen { .. } => "SNAP_NOT_OPEN",
            Self::AlreadyApplied { .. } => "SNAP_ALREADY_APPLIED",
            Self::AlreadyDisposed { .. } => "SNAP_ALREADY_DISPOSED",
            Self::ApplyInProgress { .. } => "SNAP_APPLY_IN_PROGRESS",
            Self::GlobalApply => "SNAP_GLOBAL_APPLY",
            Self::GlobalDispose => "SNAP_GLOBAL_DISPOSE",
            Self::ParentNotOpen { .. } => "SNAP_PARENT_NOT_OPEN",
            Self::ReadOnlyParent { .. } => "SNAP_READ_ONLY_PARENT",
            Self::NotCurrent { .. } => "SNAP_NOT_CURRENT",
            Self::NoVisibleRecord { .. } => "SNAP_NO_VISIBLE_RECORD",
            Self::RecordKindMismatch { .. } => "SNAP_RECORD_KIND_MISMATCH",
            Self::ApplyConflict { .. } => "SNAP_APPLY_CONFLICT",
        }
    }

    /// Protocol misuse or invariant violation
    pub fn is_illegal_state(&self) -> bool {
        !self.is_conflict()
    }

    /// Recoverable write-write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ApplyConflict { .. })
    }

    /// Invariant violation; the operation must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoVisibleRecord { .. } | Self::RecordKindMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_not_illegal_state() {
        let err = SnapshotError::ApplyConflict {
            snapshot: SnapshotId::new(4),
            conflicting: vec![StateId::new(1)],
        };
        assert!(err.is_conflict());
        assert!(!err.is_illegal_state());
        assert!(!err.is_fatal());
        assert_eq!(err.code(), "SNAP_APPLY_CONFLICT");
    }

    #[test]
    fn test_invariant_violations_are_fatal() {
        let err = SnapshotError::NoVisibleRecord {
            state: StateId::new(2),
            snapshot: SnapshotId::new(3),
        };
        assert!(err.is_fatal());
        assert!(err.is_illegal_state());
    }

    #[test]
    fn test_display_mentions_snapshot() {
        let err = SnapshotError::NotOpen {
            snapshot: SnapshotId::new(9),
            status: SnapshotStatus::Disposed,
        };
        let text = err.to_string();
        assert!(text.contains("#9"));
        assert!(text.contains("disposed"));
    }

    #[test]
    fn test_read_only_message() {
        let err = SnapshotError::ReadOnlySnapshot {
            snapshot: SnapshotId::new(1),
        };
        assert!(err.to_string().starts_with("Cannot modify a state object"));
        assert_eq!(err.code(), "SNAP_READ_ONLY");
    }
}
