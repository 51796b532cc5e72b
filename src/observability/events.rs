//! Observable snapshot lifecycle events
//!
//! Events are explicit and typed. Their string form is the `event` field
//! attached to every `tracing` line the runtime emits.

use std::fmt;

/// Observable events in the snapshot runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Snapshot lifecycle
    /// Snapshot taken (any kind)
    SnapshotTaken,
    /// Mutable snapshot applied to its parent or to global state
    SnapshotApplied,
    /// Apply rejected because of conflicting writes
    SnapshotConflict,
    /// Snapshot disposed without applying
    SnapshotDisposed,
    /// A mutable snapshot moved to a new id
    SnapshotAdvanced,

    // Global state
    /// A new global snapshot replaced the previous one
    GlobalAdvanced,

    // Records
    /// A hidden record was reused for a write
    RecordReused,
    /// Unreachable records were compacted out of a chain
    RecordsTrimmed,
    /// A merge policy resolved a concurrent write
    MergeResolved,
    /// Optimistic merges went stale and apply retried
    MergeRetried,

    // Configuration
    /// Runtime configuration installed
    ConfigInstalled,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::SnapshotTaken => "SNAPSHOT_TAKEN",
            Event::SnapshotApplied => "SNAPSHOT_APPLIED",
            Event::SnapshotConflict => "SNAPSHOT_CONFLICT",
            Event::SnapshotDisposed => "SNAPSHOT_DISPOSED",
            Event::SnapshotAdvanced => "SNAPSHOT_ADVANCED",
            Event::GlobalAdvanced => "GLOBAL_ADVANCED",
            Event::RecordReused => "RECORD_REUSED",
            Event::RecordsTrimmed => "RECORDS_TRIMMED",
            Event::MergeResolved => "MERGE_RESOLVED",
            Event::MergeRetried => "MERGE_RETRIED",
            Event::ConfigInstalled => "CONFIG_INSTALLED",
        }
    }

    /// Conflicts are expected outcomes, but worth surfacing above debug
    pub fn is_warning(&self) -> bool {
        matches!(self, Event::SnapshotConflict)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_unique() {
        let all = [
            Event::SnapshotTaken,
            Event::SnapshotApplied,
            Event::SnapshotConflict,
            Event::SnapshotDisposed,
            Event::SnapshotAdvanced,
            Event::GlobalAdvanced,
            Event::RecordReused,
            Event::RecordsTrimmed,
            Event::MergeResolved,
            Event::MergeRetried,
            Event::ConfigInstalled,
        ];
        let mut names: Vec<&str> = all.iter().map(|e| e.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn test_only_conflict_is_warning() {
        assert!(Event::SnapshotConflict.is_warning());
        assert!(!Event::SnapshotApplied.is_warning());
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(format!("{}", Event::GlobalAdvanced), "GLOBAL_ADVANCED");
    }
}
