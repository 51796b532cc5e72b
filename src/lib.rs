//! snapstate - Snapshot-isolated, multi-version state objects
//!
//! State objects keep a chain of versioned records. Snapshots read a
//! consistent view of every object without locking, mutable snapshots
//! collect writes in isolation and publish them atomically with an
//! optimistic, conflict-checked apply.

pub mod cli;
pub mod config;
pub mod mvcc;
pub mod observability;
pub mod observer;
pub mod snapshot;
pub mod state;

pub use config::SnapshotConfig;
pub use observer::{ChangeSet, ObserverHandle};
pub use snapshot::{
    take_mutable_snapshot, take_readonly_snapshot, take_snapshot, with_mutable_snapshot,
    ApplyResult, Snapshot, SnapshotError, SnapshotKind, SnapshotResult, SnapshotStatus,
};
pub use state::{
    mutable_state_of, mutable_state_with_policy, MutableState, StateId, StateList, StateObject,
};
