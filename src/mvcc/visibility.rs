//! Record visibility, reuse and trimming
//!
//! ## Validity
//!
//! A record stamped `C` is *valid* for a view `(id, invalid)` iff:
//! 1. `C != INVALID_SNAPSHOT`
//! 2. `C <= id`
//! 3. `C` is not a member of `invalid`
//!
//! ## Visibility
//!
//! The visible record is the valid record with the **largest** stamp.
//! Chains are not ordered by stamp (records get reused in place), so the
//! whole chain is scanned.
//!
//! ## Reuse
//!
//! With `reuse_limit` = lowest pinned id - 1:
//! - an abandoned record (`INVALID_SNAPSHOT`) is reusable immediately
//! - when two records are valid at `reuse_limit`, the older one is hidden
//!   behind the newer for every open snapshot and is reusable
//!
//! ## Trimming
//!
//! Trimming drops what reuse would hand out: abandoned records and every
//! record valid at `reuse_limit` except the newest such record.

use super::{ReadView, RecordChain, RecordRef, SnapshotId, SnapshotIdSet};

/// Stateless visibility resolver.
pub struct Visibility;

impl Visibility {
    /// Validity of a single stamp.
    #[inline]
    pub fn is_valid(id: SnapshotId, candidate: SnapshotId, invalid: &SnapshotIdSet) -> bool {
        !candidate.is_invalid() && candidate <= id && !invalid.get(candidate)
    }

    /// Visible record among `records`, if any.
    pub fn readable_in(
        records: &[RecordRef],
        id: SnapshotId,
        invalid: &SnapshotIdSet,
    ) -> Option<RecordRef> {
        let mut best: Option<(&RecordRef, SnapshotId)> = None;
        for record in records {
            let stamp = record.snapshot_id();
            if Self::is_valid(id, stamp, invalid) && best.map_or(true, |(_, b)| stamp > b) {
                best = Some((record, stamp));
            }
        }
        best.map(|(record, _)| RecordRef::clone(record))
    }

    /// Visible record of `chain` under `view`.
    pub fn readable(chain: &RecordChain, view: &ReadView) -> Option<RecordRef> {
        Self::readable_in(&chain.load(), view.id(), view.invalid())
    }

    /// Visible record of `chain` with an explicit id and invalid set.
    pub fn readable_at(
        chain: &RecordChain,
        id: SnapshotId,
        invalid: &SnapshotIdSet,
    ) -> Option<RecordRef> {
        Self::readable_in(&chain.load(), id, invalid)
    }

    /// A record no open snapshot can observe, if the chain has one.
    pub fn reusable(chain: &RecordChain, reuse_limit: SnapshotId) -> Option<RecordRef> {
        let records = chain.load();
        let mut obscured: Option<(&RecordRef, SnapshotId)> = None;
        for record in records.iter() {
            let stamp = record.snapshot_id();
            if stamp.is_invalid() {
                return Some(RecordRef::clone(record));
            }
            if Self::is_valid(reuse_limit, stamp, &SnapshotIdSet::EMPTY) {
                match obscured {
                    None => obscured = Some((record, stamp)),
                    Some((other, other_stamp)) => {
                        let older = if stamp < other_stamp { record } else { other };
                        return Some(RecordRef::clone(older));
                    }
                }
            }
        }
        None
    }

    /// Compacts `chain`, returning the number of records dropped.
    pub fn trim(chain: &RecordChain, reuse_limit: SnapshotId) -> usize {
        let records = chain.load();
        let newest_below_limit = records
            .iter()
            .map(|r| r.snapshot_id())
            .filter(|stamp| Self::is_valid(reuse_limit, *stamp, &SnapshotIdSet::EMPTY))
            .max();
        chain.retain(|record| {
            let stamp = record.snapshot_id();
            if stamp.is_invalid() {
                return false;
            }
            match newest_below_limit {
                Some(newest) if Self::is_valid(reuse_limit, stamp, &SnapshotIdSet::EMPTY) => {
                    stamp == newest
                }
                _ => true,
            }
        })
    }
}
