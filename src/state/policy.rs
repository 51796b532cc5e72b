//! Mutation policies
//!
//! A policy decides when two values are the same (so a write can be
//! skipped, or a concurrent write treated as already applied) and how to
//! combine concurrent writes when they differ.

/// Equivalence and merge rules for values of `T`.
pub trait SnapshotMutationPolicy<T>: Send + Sync {
    fn equivalent(&self, a: &T, b: &T) -> bool;

    /// Combines two concurrent writes. `None` reports a conflict.
    fn merge(&self, previous: &T, current: &T, applied: &T) -> Option<T> {
        let _ = (previous, current, applied);
        None
    }
}

/// Values are equivalent when `==` says so. Never merges.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralEqualityPolicy;

impl<T: PartialEq> SnapshotMutationPolicy<T> for StructuralEqualityPolicy {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        a == b
    }
}

/// Every write counts, even of an equal value. Never merges.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverEqualPolicy;

impl<T> SnapshotMutationPolicy<T> for NeverEqualPolicy {
    fn equivalent(&self, _a: &T, _b: &T) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sum;

    impl SnapshotMutationPolicy<i64> for Sum {
        fn equivalent(&self, a: &i64, b: &i64) -> bool {
            a == b
        }

        fn merge(&self, previous: &i64, current: &i64, applied: &i64) -> Option<i64> {
            Some(current + applied - previous)
        }
    }

    #[test]
    fn test_structural_equality() {
        let policy = StructuralEqualityPolicy;
        assert!(policy.equivalent(&"a".to_string(), &"a".to_string()));
        assert!(!SnapshotMutationPolicy::<i32>::equivalent(&policy, &1, &2));
        assert_eq!(SnapshotMutationPolicy::<i32>::merge(&policy, &0, &1, &2), None);
    }

    #[test]
    fn test_never_equal() {
        let policy = NeverEqualPolicy;
        assert!(!SnapshotMutationPolicy::<i32>::equivalent(&policy, &1, &1));
    }

    #[test]
    fn test_custom_merge() {
        assert_eq!(Sum.merge(&10, &15, &12), Some(17));
    }
}
