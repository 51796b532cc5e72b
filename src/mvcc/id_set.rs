//! SnapshotIdSet - the invalid set of a snapshot
//!
//! A snapshot treats writes stamped with any id in its invalid set as
//! invisible: those snapshots were still open, or were abandoned, when the
//! snapshot was taken.
//!
//! The set is an immutable value. Every mutating operation returns a new
//! set and leaves the receiver untouched, so a set can be published to
//! lock-free readers by swapping a pointer.
//!
//! # Layout
//!
//! Recently allocated ids cluster near the top of the id space, so the set
//! keeps a 128-bit window (`lower`, `upper`) starting at `lower_bound`, and
//! a sorted array for the rare ids that fall below the window. Setting a
//! bit above the window slides the window upwards, spilling set bits into
//! the array.

use std::fmt;
use std::sync::Arc;

use super::snapshot_id::SnapshotId;

const WORD_BITS: u64 = 64;

/// Compact, ordered set of snapshot ids.
#[derive(Clone, Default)]
pub struct SnapshotIdSet {
    /// Bits for `[lower_bound + 64, lower_bound + 128)`.
    upper: u64,
    /// Bits for `[lower_bound, lower_bound + 64)`.
    lower: u64,
    /// Start of the window, always a multiple of 64.
    lower_bound: u64,
    /// Sorted ids below `lower_bound`.
    below: Option<Arc<[u64]>>,
}

impl SnapshotIdSet {
    /// The empty set.
    pub const EMPTY: SnapshotIdSet = SnapshotIdSet {
        upper: 0,
        lower: 0,
        lower_bound: 0,
        below: None,
    };

    /// Creates an empty set.
    pub fn new() -> Self {
        Self::EMPTY
    }

    /// Returns true if `id` is a member.
    pub fn get(&self, id: SnapshotId) -> bool {
        let bit = id.value();
        if bit >= self.lower_bound {
            let offset = bit - self.lower_bound;
            if offset < WORD_BITS {
                return self.lower & (1u64 << offset) != 0;
            }
            if offset < 2 * WORD_BITS {
                return self.upper & (1u64 << (offset - WORD_BITS)) != 0;
            }
            return false;
        }
        self.below_slice().binary_search(&bit).is_ok()
    }

    /// Returns a set that also contains `id`.
    pub fn set(&self, id: SnapshotId) -> Self {
        let bit = id.value();
        if bit >= self.lower_bound {
            let offset = bit - self.lower_bound;
            if offset < WORD_BITS {
                let mask = 1u64 << offset;
                if self.lower & mask != 0 {
                    return self.clone();
                }
                return self.with_words(self.upper, self.lower | mask);
            }
            if offset < 2 * WORD_BITS {
                let mask = 1u64 << (offset - WORD_BITS);
                if self.upper & mask != 0 {
                    return self.clone();
                }
                return self.with_words(self.upper | mask, self.lower);
            }
            return self.slide_window_to(bit).set(id);
        }

        let below = self.below_slice();
        match below.binary_search(&bit) {
            Ok(_) => self.clone(),
            Err(pos) => {
                let mut ids = Vec::with_capacity(below.len() + 1);
                ids.extend_from_slice(&below[..pos]);
                ids.push(bit);
                ids.extend_from_slice(&below[pos..]);
                self.with_below(Some(ids.into()))
            }
        }
    }

    /// Returns a set without `id`.
    pub fn clear(&self, id: SnapshotId) -> Self {
        let bit = id.value();
        if bit >= self.lower_bound {
            let offset = bit - self.lower_bound;
            if offset < WORD_BITS {
                let mask = 1u64 << offset;
                if self.lower & mask == 0 {
                    return self.clone();
                }
                return self.with_words(self.upper, self.lower & !mask);
            }
            if offset < 2 * WORD_BITS {
                let mask = 1u64 << (offset - WORD_BITS);
                if self.upper & mask == 0 {
                    return self.clone();
                }
                return self.with_words(self.upper & !mask, self.lower);
            }
            return self.clone();
        }

        let below = self.below_slice();
        match below.binary_search(&bit) {
            Err(_) => self.clone(),
            Ok(pos) => {
                let below = if below.len() == 1 {
                    None
                } else {
                    let mut ids = below.to_vec();
                    ids.remove(pos);
                    Some(ids.into())
                };
                self.with_below(below)
            }
        }
    }

    /// Set union.
    pub fn or(&self, other: &SnapshotIdSet) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        if self.lower_bound == other.lower_bound && other.below.is_none() {
            return Self {
                upper: self.upper | other.upper,
                lower: self.lower | other.lower,
                lower_bound: self.lower_bound,
                below: self.below.clone(),
            };
        }
        other.iter().fold(self.clone(), |set, id| set.set(id))
    }

    /// Set difference: members of `self` that are not in `other`.
    pub fn and_not(&self, other: &SnapshotIdSet) -> Self {
        if other.is_empty() || self.is_empty() {
            return self.clone();
        }
        if self.lower_bound == other.lower_bound && other.below.is_none() {
            return Self {
                upper: self.upper & !other.upper,
                lower: self.lower & !other.lower,
                lower_bound: self.lower_bound,
                below: self.below.clone(),
            };
        }
        other.iter().fold(self.clone(), |set, id| set.clear(id))
    }

    /// Adds every id in `[from, until)`.
    pub fn add_range(&self, from: SnapshotId, until: SnapshotId) -> Self {
        (from.value()..until.value()).fold(self.clone(), |set, bit| set.set(SnapshotId::new(bit)))
    }

    /// The smallest member, or `default` when the set is empty.
    pub fn lowest(&self, default: SnapshotId) -> SnapshotId {
        if let Some(first) = self.below_slice().first() {
            return SnapshotId::new(*first);
        }
        if self.lower != 0 {
            return SnapshotId::new(self.lower_bound + u64::from(self.lower.trailing_zeros()));
        }
        if self.upper != 0 {
            return SnapshotId::new(
                self.lower_bound + WORD_BITS + u64::from(self.upper.trailing_zeros()),
            );
        }
        default
    }

    /// Returns true if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.lower == 0 && self.upper == 0 && self.below.is_none()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.below_slice().len()
            + self.lower.count_ones() as usize
            + self.upper.count_ones() as usize
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = SnapshotId> + '_ {
        let base = self.lower_bound;
        let lower = self.lower;
        let upper = self.upper;
        self.below_slice()
            .iter()
            .copied()
            .chain((0..WORD_BITS).filter(move |b| lower & (1u64 << b) != 0).map(move |b| base + b))
            .chain(
                (0..WORD_BITS)
                    .filter(move |b| upper & (1u64 << b) != 0)
                    .map(move |b| base + WORD_BITS + b),
            )
            .map(SnapshotId::new)
    }

    fn below_slice(&self) -> &[u64] {
        self.below.as_deref().unwrap_or(&[])
    }

    fn with_words(&self, upper: u64, lower: u64) -> Self {
        Self {
            upper,
            lower,
            lower_bound: self.lower_bound,
            below: self.below.clone(),
        }
    }

    fn with_below(&self, below: Option<Arc<[u64]>>) -> Self {
        Self {
            upper: self.upper,
            lower: self.lower,
            lower_bound: self.lower_bound,
            below,
        }
    }

    /// Moves the window up so that `bit` falls inside its lower word.
    fn slide_window_to(&self, bit: u64) -> Self {
        let target = bit / WORD_BITS * WORD_BITS;
        let mut upper = self.upper;
        let mut lower = self.lower;
        let mut lower_bound = self.lower_bound;
        let mut spilled: Option<Vec<u64>> = None;

        while lower_bound < target {
            if lower != 0 {
                let ids = spilled.get_or_insert_with(|| self.below_slice().to_vec());
                ids.extend(
                    (0..WORD_BITS)
                        .filter(|b| lower & (1u64 << b) != 0)
                        .map(|b| lower_bound + b),
                );
            }
            if upper == 0 {
                lower_bound = target;
                lower = 0;
                break;
            }
            lower = upper;
            upper = 0;
            lower_bound += WORD_BITS;
        }

        Self {
            upper,
            lower,
            lower_bound,
            below: match spilled {
                Some(ids) => Some(ids.into()),
                None => self.below.clone(),
            },
        }
    }
}

impl PartialEq for SnapshotIdSet {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for SnapshotIdSet {}

impl fmt::Debug for SnapshotIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.value())).finish()
    }
}

impl FromIterator<SnapshotId> for SnapshotIdSet {
    fn from_iter<I: IntoIterator<Item = SnapshotId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, |set, id| set.set(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u64) -> SnapshotId {
        SnapshotId::new(v)
    }

    fn ids(set: &SnapshotIdSet) -> Vec<u64> {
        set.iter().map(|i| i.value()).collect()
    }

    // ==================== Membership ====================

    #[test]
    fn test_empty_set_has_no_members() {
        let set = SnapshotIdSet::new();
        assert!(set.is_empty());
        assert!(!set.get(id(0)));
        assert!(!set.get(id(1000)));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_set_and_get_inside_window() {
        let set = SnapshotIdSet::new().set(id(3)).set(id(70));
        assert!(set.get(id(3)));
        assert!(set.get(id(70)));
        assert!(!set.get(id(4)));
        assert_eq!(ids(&set), vec![3, 70]);
    }

    #[test]
    fn test_set_is_persistent() {
        let a = SnapshotIdSet::new().set(id(5));
        let b = a.set(id(6));
        assert!(!a.get(id(6)));
        assert!(b.get(id(5)) && b.get(id(6)));
    }

    #[test]
    fn test_setting_existing_member_is_noop() {
        let a = SnapshotIdSet::new().set(id(9));
        assert_eq!(a.set(id(9)), a);
    }

    // ==================== Window sliding ====================

    #[test]
    fn test_far_bit_slides_window_and_keeps_old_members() {
        let set = SnapshotIdSet::new().set(id(1)).set(id(65)).set(id(1_000));
        assert!(set.get(id(1)));
        assert!(set.get(id(65)));
        assert!(set.get(id(1_000)));
        assert!(!set.get(id(999)));
        assert_eq!(ids(&set), vec![1, 65, 1_000]);
    }

    #[test]
    fn test_insert_below_window_keeps_order() {
        let set = SnapshotIdSet::new().set(id(500)).set(id(7)).set(id(3)).set(id(12));
        assert_eq!(ids(&set), vec![3, 7, 12, 500]);
    }

    #[test]
    fn test_clear_below_window() {
        let set = SnapshotIdSet::new().set(id(2)).set(id(4)).set(id(600));
        let cleared = set.clear(id(2));
        assert_eq!(ids(&cleared), vec![4, 600]);
        let cleared = cleared.clear(id(4));
        assert_eq!(ids(&cleared), vec![600]);
    }

    #[test]
    fn test_clear_missing_is_noop() {
        let set = SnapshotIdSet::new().set(id(10));
        assert_eq!(set.clear(id(11)), set);
        assert_eq!(set.clear(id(10_000)), set);
    }

    // ==================== Set algebra ====================

    #[test]
    fn test_or_and_not() {
        let a: SnapshotIdSet = [1, 2, 3, 300].into_iter().map(id).collect();
        let b: SnapshotIdSet = [3, 4, 300].into_iter().map(id).collect();
        assert_eq!(ids(&a.or(&b)), vec![1, 2, 3, 4, 300]);
        assert_eq!(ids(&a.and_not(&b)), vec![1, 2]);
    }

    #[test]
    fn test_add_range_is_half_open() {
        let set = SnapshotIdSet::new().add_range(id(4), id(8));
        assert_eq!(ids(&set), vec![4, 5, 6, 7]);
        assert!(SnapshotIdSet::new().add_range(id(4), id(4)).is_empty());
    }

    #[test]
    fn test_lowest() {
        assert_eq!(SnapshotIdSet::new().lowest(id(42)), id(42));
        let set = SnapshotIdSet::new().set(id(900)).set(id(17));
        assert_eq!(set.lowest(id(42)), id(17));
        let upper_only = SnapshotIdSet::new().set(id(100));
        assert_eq!(upper_only.lowest(id(1)), id(100));
    }

    #[test]
    fn test_equality_ignores_layout() {
        let slid = SnapshotIdSet::new().set(id(5)).set(id(400)).clear(id(400));
        let plain = SnapshotIdSet::new().set(id(5));
        assert_eq!(slid, plain);
    }

    #[test]
    fn test_debug_lists_members() {
        let set = SnapshotIdSet::new().set(id(2)).set(id(8));
        assert_eq!(format!("{:?}", set), "{2, 8}");
    }
}
