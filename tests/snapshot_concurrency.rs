//! Snapshot Concurrency Tests
//!
//! Readers and writers on separate threads. Readers never block, and every
//! read-only snapshot observes an atomic prefix of the applies.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use snapstate::state::NeverEqualPolicy;
use snapstate::{
    mutable_state_of, mutable_state_with_policy, take_mutable_snapshot, take_readonly_snapshot,
    with_mutable_snapshot, MutableState, Snapshot,
};

struct Pair {
    left: MutableState<u64>,
    right: MutableState<u64>,
}

impl Pair {
    fn new() -> Self {
        Self {
            left: mutable_state_of(0),
            right: mutable_state_of(0),
        }
    }
}

// =============================================================================
// Atomic Visibility
// =============================================================================

/// Readers never see one half of a two-object apply.
#[test]
fn test_readers_see_whole_applies() {
    let pair = Pair::new();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let readers: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| {
                    let mut last = 0;
                    while !done.load(Ordering::Acquire) {
                        let s = take_readonly_snapshot(None).unwrap();
                        let left = *pair.left.get_in(&s).unwrap();
                        let right = *pair.right.get_in(&s).unwrap();
                        s.dispose().unwrap();
                        assert_eq!(left, right);
                        assert!(left >= last, "snapshots went backwards: {left} < {last}");
                        last = left;
                    }
                })
            })
            .collect();

        for value in 1..=200u64 {
            let s = take_mutable_snapshot(None, None).unwrap();
            pair.left.set_in(&s, value).unwrap();
            pair.right.set_in(&s, value).unwrap();
            assert!(s.apply().unwrap().is_success());
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
    });

    assert_eq!((*pair.left.get().unwrap(), *pair.right.get().unwrap()), (200, 200));
}

/// Conflicting increments either apply or are rejected; none are lost.
///
/// Equal concurrent writes would merge, so the counter never treats two
/// values as equivalent.
#[test]
fn test_concurrent_increments_are_not_lost() {
    let counter = mutable_state_with_policy(0u64, NeverEqualPolicy);
    let applied = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..100 {
                    let result = with_mutable_snapshot(|| {
                        let next = *counter.get().unwrap() + 1;
                        counter.set(next).unwrap();
                    });
                    match result {
                        Ok(()) => {
                            applied.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => assert!(e.is_conflict(), "unexpected error {e}"),
                    }
                }
            });
        }
    });

    assert_eq!(*counter.get().unwrap(), applied.load(Ordering::SeqCst) as u64);
}

/// Many pairs, many writers, readers checking every pair.
#[test]
fn test_many_pairs_stay_consistent() {
    let pairs: Vec<Pair> = (0..4).map(|_| Pair::new()).collect();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let readers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        let s = take_readonly_snapshot(None).unwrap();
                        for pair in &pairs {
                            let left = *pair.left.get_in(&s).unwrap();
                            assert_eq!(left, *pair.right.get_in(&s).unwrap());
                        }
                        s.dispose().unwrap();
                    }
                })
            })
            .collect();
        let writers: Vec<_> = (0..3)
            .map(|w| {
                let pairs = &pairs;
                scope.spawn(move || {
                    for i in 0..100 {
                        let pair = &pairs[(w + i) % pairs.len()];
                        let _ = with_mutable_snapshot(|| {
                            let next = *pair.left.get().unwrap() + 1;
                            pair.left.set(next).unwrap();
                            pair.right.set(next).unwrap();
                        });
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }
    });
}

/// Snapshots taken on one thread can be read on another.
#[test]
fn test_snapshot_moves_between_threads() {
    let x = mutable_state_of(1);
    let s = take_readonly_snapshot(None).unwrap();
    let reader = {
        let x = x.clone();
        thread::spawn(move || {
            let value = *x.get_in(&s).unwrap();
            s.dispose().unwrap();
            value
        })
    };
    Snapshot::global(|| x.set(2)).unwrap();
    assert_eq!(reader.join().unwrap(), 1);
}
