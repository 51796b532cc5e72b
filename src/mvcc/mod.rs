//! MVCC building blocks
//!
//! The versioned-memory vocabulary the snapshot runtime is built from:
//! - `SnapshotId` - Totally ordered snapshot identity
//! - `SnapshotIdSet` - Compact invalid set
//! - `StateRecord` / `ValueRecord` - Versioned value slots
//! - `RecordChain` - Per-object record history
//! - `ReadView` - The `(id, invalid)` window of a snapshot
//! - `Visibility` - Validity, visible-record selection, reuse and trimming
//! - `PinningTable` - Lowest-pinned id tracking for the reuse limit
//!
//! Nothing in this module takes locks or touches global state.

mod id_set;
mod pinning;
mod read_view;
mod record;
mod record_chain;
mod snapshot_id;
mod visibility;

pub use id_set::SnapshotIdSet;
pub use pinning::{PinHandle, PinningTable};
pub use read_view::ReadView;
pub use record::{same_record, RecordRef, RecordStamp, StateRecord, ValueRecord};
pub use record_chain::RecordChain;
pub use snapshot_id::{SnapshotId, FIRST_SNAPSHOT, INVALID_SNAPSHOT};
pub(crate) use snapshot_id::UNDER_CONSTRUCTION;
pub use visibility::Visibility;
