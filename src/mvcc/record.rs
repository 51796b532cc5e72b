//! StateRecord - one versioned value of a state object
//!
//! A record is a value slot tagged with the id of the snapshot that wrote
//! it. Records are shared as `Arc<dyn StateRecord>` so that arbitrary
//! state-holder shapes can plug their own payloads into the same chain
//! machinery.
//!
//! The stamp is atomic. A writer stamps a fresh record with
//! `UNDER_CONSTRUCTION`, fills the payload, and then publishes the real id
//! with a release store; readers load the stamp with acquire ordering, so a
//! record whose stamp a reader accepts is always fully written.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::snapshot_id::SnapshotId;
use crate::snapshot::{SnapshotError, SnapshotResult};

/// Shared handle to a record.
pub type RecordRef = Arc<dyn StateRecord>;

/// Atomic creator-id tag carried by every record.
pub struct RecordStamp {
    snapshot_id: AtomicU64,
}

impl RecordStamp {
    pub fn new(id: SnapshotId) -> Self {
        Self {
            snapshot_id: AtomicU64::new(id.value()),
        }
    }

    /// Creator id, acquire-loaded.
    #[inline]
    pub fn get(&self) -> SnapshotId {
        SnapshotId::new(self.snapshot_id.load(Ordering::Acquire))
    }

    /// Publishes a new creator id.
    #[inline]
    pub fn set(&self, id: SnapshotId) {
        self.snapshot_id.store(id.value(), Ordering::Release);
    }
}

impl fmt::Debug for RecordStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// A versioned value slot.
///
/// Implementors supply the payload; the snapshot machinery only touches the
/// stamp and the two copy operations.
pub trait StateRecord: Send + Sync + 'static {
    /// The creator-id tag.
    fn stamp(&self) -> &RecordStamp;

    /// Copies the payload of `other` into this record.
    ///
    /// `other` is always a record of the same state object, so a payload of
    /// a different concrete kind is an invariant violation.
    fn assign(&self, other: &dyn StateRecord) -> SnapshotResult<()>;

    /// Allocates a blank record of the same concrete kind.
    fn create(&self) -> RecordRef;

    fn as_any(&self) -> &dyn Any;

    /// Shorthand for `self.stamp().get()`.
    #[inline]
    fn snapshot_id(&self) -> SnapshotId {
        self.stamp().get()
    }
}

/// Identity comparison for records.
#[inline]
pub fn same_record(a: &RecordRef, b: &RecordRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Record holding a single immutable value behind an atomic pointer.
///
/// Assigning shares the source's value `Arc` rather than cloning `T`.
pub struct ValueRecord<T> {
    stamp: RecordStamp,
    value: ArcSwap<T>,
}

impl<T: Send + Sync + 'static> ValueRecord<T> {
    pub fn new(id: SnapshotId, value: T) -> Self {
        Self::from_arc(id, Arc::new(value))
    }

    pub fn from_arc(id: SnapshotId, value: Arc<T>) -> Self {
        Self {
            stamp: RecordStamp::new(id),
            value: ArcSwap::new(value),
        }
    }

    /// Current value, without locking.
    #[inline]
    pub fn value(&self) -> Arc<T> {
        self.value.load_full()
    }

    pub fn set_value(&self, value: Arc<T>) {
        self.value.store(value);
    }

    /// Downcasts a record reference to a `ValueRecord<T>`.
    pub fn downcast(record: &dyn StateRecord) -> SnapshotResult<&ValueRecord<T>> {
        record
            .as_any()
            .downcast_ref::<ValueRecord<T>>()
            .ok_or(SnapshotError::RecordKindMismatch {
                expected: std::any::type_name::<ValueRecord<T>>(),
            })
    }
}

impl<T: Send + Sync + 'static> StateRecord for ValueRecord<T> {
    fn stamp(&self) -> &RecordStamp {
        &self.stamp
    }

    fn assign(&self, other: &dyn StateRecord) -> SnapshotResult<()> {
        let other = Self::downcast(other)?;
        self.value.store(other.value());
        Ok(())
    }

    fn create(&self) -> RecordRef {
        Arc::new(Self::from_arc(
            super::snapshot_id::UNDER_CONSTRUCTION,
            self.value(),
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for ValueRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRecord")
            .field("snapshot_id", &self.stamp)
            .field("value", &self.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::snapshot_id::UNDER_CONSTRUCTION;

    #[test]
    fn test_stamp_publish_and_load() {
        let stamp = RecordStamp::new(SnapshotId::new(3));
        assert_eq!(stamp.get(), SnapshotId::new(3));
        stamp.set(SnapshotId::new(9));
        assert_eq!(stamp.get(), SnapshotId::new(9));
    }

    #[test]
    fn test_assign_shares_value() {
        let a = ValueRecord::new(SnapshotId::new(1), String::from("a"));
        let b = ValueRecord::new(SnapshotId::new(2), String::from("b"));
        b.assign(&a).unwrap();
        assert!(Arc::ptr_eq(&a.value(), &b.value()));
        // stamps are untouched by assign
        assert_eq!(b.snapshot_id(), SnapshotId::new(2));
    }

    #[test]
    fn test_assign_rejects_other_kind() {
        let a = ValueRecord::new(SnapshotId::new(1), 5u32);
        let b = ValueRecord::new(SnapshotId::new(1), String::new());
        let err = b.assign(&a).unwrap_err();
        assert!(matches!(err, SnapshotError::RecordKindMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_create_is_unpublished() {
        let a: RecordRef = Arc::new(ValueRecord::new(SnapshotId::new(4), 10i64));
        let fresh = a.create();
        assert_eq!(fresh.snapshot_id(), UNDER_CONSTRUCTION);
        assert!(!same_record(&a, &fresh));
        assert_eq!(*ValueRecord::<i64>::downcast(&*fresh).unwrap().value(), 10);
    }
}
