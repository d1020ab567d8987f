//! Property-based tests for needles, lock contexts and pools.
//!
//! # Lock context invariants
//! - `free()` clears the cached value exactly when no capture flag is set,
//!   whatever mix of local and context-backed captures led there
//! - Acquired ids are distinct, claimed in the context, and all handed back
//!   once the lock is dropped
//! - With no outstanding captures, a value written through one lock is read
//!   back through any other lock on the same context
//!
//! # Pool invariants
//! - `FixedSizeQueue` behaves like a bounded FIFO that rejects the newest item
//! - A pool never holds more than its capacity, whatever the donate/take mix
//!
//! # Weak needle invariants
//! - Needle equality follows target equality while both targets are alive
//! - Hash codes are stable across target death

mod common;

use common::*;
use needlework::{FixedSizeQueue, LockContext, NeedleLock, Pool, WeakNeedle};
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_capacity() -> impl Strategy<Value = usize> {
    1_usize..=96
}

#[derive(Debug, Clone)]
enum CaptureOp {
    Acquire,
    Release(usize),
}

fn arb_capture_ops() -> impl Strategy<Value = Vec<CaptureOp>> {
    proptest::collection::vec(
        prop_oneof![
            3 => Just(CaptureOp::Acquire),
            2 => (0_usize..128).prop_map(CaptureOp::Release),
        ],
        0..=64,
    )
}

#[derive(Debug, Clone)]
enum FlagOp {
    Capture(usize),
    Uncapture(usize),
    Acquire,
    Release(usize),
    SetValue(u32),
    Free,
}

/// Ids are reduced modulo the context capacity when applied.
fn arb_flag_ops() -> impl Strategy<Value = Vec<FlagOp>> {
    proptest::collection::vec(
        prop_oneof![
            3 => any::<usize>().prop_map(FlagOp::Capture),
            3 => any::<usize>().prop_map(FlagOp::Uncapture),
            2 => Just(FlagOp::Acquire),
            2 => any::<usize>().prop_map(FlagOp::Release),
            1 => any::<u32>().prop_map(FlagOp::SetValue),
            3 => Just(FlagOp::Free),
        ],
        0..=64,
    )
}

#[derive(Debug, Clone)]
enum QueueOp {
    Add(u16),
    Take,
}

fn arb_queue_ops() -> impl Strategy<Value = Vec<QueueOp>> {
    proptest::collection::vec(
        prop_oneof![
            any::<u16>().prop_map(QueueOp::Add),
            Just(QueueOp::Take),
        ],
        0..=128,
    )
}

// ============================================================================
// Lock Context Property Tests
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// Acquired ids stay distinct and the context's claim count tracks them.
    #[test]
    fn acquired_ids_are_distinct_and_returned(
        capacity in arb_capacity(),
        ops in arb_capture_ops()
    ) {
        init_test_logging();
        let context = Arc::new(LockContext::<u64>::new(capacity).unwrap());
        let mut lock = NeedleLock::new(Arc::clone(&context));
        let mut held = HashSet::new();

        for op in ops {
            match op {
                CaptureOp::Acquire => match lock.acquire() {
                    Ok(id) => {
                        prop_assert!(id < capacity);
                        prop_assert!(held.insert(id), "id {} granted twice", id);
                    }
                    Err(_) => prop_assert_eq!(held.len(), capacity),
                },
                CaptureOp::Release(id) => {
                    prop_assert_eq!(lock.release(id), held.remove(&id));
                }
            }
            prop_assert_eq!(context.captured_count(), held.len());
            let mut captured: Vec<_> = lock.captured().collect();
            captured.sort_unstable();
            let mut expected: Vec<_> = held.iter().copied().collect();
            expected.sort_unstable();
            prop_assert_eq!(captured, expected);
        }

        drop(lock);
        prop_assert_eq!(context.captured_count(), 0);
    }

    /// `free()` drops the cache iff no flag is outstanding, and context
    /// claims track `acquire`/`release` even when the local flag was cleared
    /// first.
    #[test]
    fn free_follows_outstanding_flags(
        capacity in 1_usize..=8,
        initial in any::<u32>(),
        ops in arb_flag_ops()
    ) {
        let context = Arc::new(LockContext::new(capacity).unwrap());
        let mut lock = NeedleLock::with_target(Arc::clone(&context), initial);
        let mut flags = HashSet::new();
        let mut acquired = HashSet::new();
        let mut cached = Some(initial);

        for op in ops {
            match op {
                FlagOp::Capture(id) => {
                    let id = id % capacity;
                    lock.capture(id);
                    flags.insert(id);
                }
                FlagOp::Uncapture(id) => {
                    let id = id % capacity;
                    lock.uncapture(id);
                    flags.remove(&id);
                }
                FlagOp::Acquire => match lock.acquire() {
                    Ok(id) => {
                        prop_assert!(acquired.insert(id));
                        flags.insert(id);
                    }
                    Err(_) => prop_assert_eq!(acquired.len(), capacity),
                },
                FlagOp::Release(id) => {
                    let id = id % capacity;
                    let held = acquired.remove(&id);
                    prop_assert_eq!(lock.release(id), held);
                    if held {
                        flags.remove(&id);
                    }
                }
                FlagOp::SetValue(value) => {
                    lock.set_value(value);
                    cached = Some(value);
                }
                FlagOp::Free => {
                    lock.free();
                    if flags.is_empty() {
                        cached = None;
                    }
                }
            }
            prop_assert_eq!(lock.cached(), cached);
            prop_assert_eq!(lock.is_alive(), cached.is_some());
            prop_assert_eq!(lock.captured().count(), flags.len());
            prop_assert_eq!(context.captured_count(), acquired.len());
        }

        drop(lock);
        prop_assert_eq!(context.captured_count(), 0);
    }

    /// Without captures, any written value is visible through another lock.
    #[test]
    fn write_through_one_lock_read_through_another(
        capacity in arb_capacity(),
        values in proptest::collection::vec(any::<i64>(), 1..=16)
    ) {
        let context = Arc::new(LockContext::new(capacity).unwrap());
        let mut writer = NeedleLock::new(Arc::clone(&context));
        let mut reader = NeedleLock::new(context);

        for value in values {
            writer.set_value(value);
            prop_assert_eq!(reader.value(), Some(value));
            prop_assert_eq!(writer.value(), Some(value));
        }
    }

    /// A lock holding a capture keeps reading its own cached value while
    /// another participant's capture is outstanding.
    #[test]
    fn foreign_capture_keeps_cached_value(first in any::<i32>(), second in any::<i32>()) {
        let context = Arc::new(LockContext::new(4).unwrap());
        let mut a = NeedleLock::new(Arc::clone(&context));
        let mut b = NeedleLock::new(context);

        a.set_value(first);
        prop_assert_eq!(b.value(), Some(first));

        let id = a.acquire().unwrap();
        a.set_value(second);
        prop_assert_eq!(b.value(), Some(first));
        prop_assert_eq!(a.value(), Some(second));

        prop_assert!(a.release(id));
        prop_assert_eq!(b.value(), Some(second));
    }
}

// ============================================================================
// Pool Property Tests
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// The queue matches a bounded FIFO model that rejects the newest item.
    #[test]
    fn queue_matches_bounded_fifo_model(
        capacity in 1_usize..=16,
        ops in arb_queue_ops()
    ) {
        let queue = FixedSizeQueue::new(capacity).unwrap();
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                QueueOp::Add(item) => {
                    let accepted = queue.add(item).is_ok();
                    prop_assert_eq!(accepted, model.len() < capacity);
                    if accepted {
                        model.push_back(item);
                    }
                }
                QueueOp::Take => prop_assert_eq!(queue.try_take(), model.pop_front()),
            }
            prop_assert_eq!(queue.len(), model.len());
        }
    }

    /// Pool length never exceeds capacity and every accepted donation comes
    /// back out exactly once.
    #[test]
    fn pool_never_exceeds_capacity(
        capacity in 1_usize..=16,
        ops in arb_queue_ops()
    ) {
        init_test_logging();
        let pool = Pool::<u16>::new(capacity).unwrap();
        let mut accepted = 0usize;
        let mut taken = 0usize;

        for op in ops {
            match op {
                QueueOp::Add(item) => {
                    if pool.donate(item) {
                        accepted += 1;
                    }
                }
                QueueOp::Take => {
                    if pool.try_get().is_some() {
                        taken += 1;
                    }
                }
            }
            prop_assert!(pool.len() <= pool.capacity());
            prop_assert_eq!(pool.len(), accepted - taken);
        }
    }
}

// ============================================================================
// Weak Needle Property Tests
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// Live needles compare like their targets; dead ones only match dead ones.
    #[test]
    fn weak_needle_equality_follows_targets(left in ".{0,12}", right in ".{0,12}") {
        let a = Arc::new(left.clone());
        let b = Arc::new(right.clone());
        let na = WeakNeedle::from_arc(&a);
        let nb = WeakNeedle::from_arc(&b);

        prop_assert_eq!(na == nb, left == right);
        prop_assert!(na.eq_value(&left));

        drop(a);
        prop_assert!(na != nb);
        drop(b);
        prop_assert!(na == nb);
    }

    /// The hash code is fixed at construction.
    #[test]
    fn weak_needle_hash_code_is_stable(value in any::<u64>(), rewrites in 0_usize..8) {
        let target = Arc::new(value);
        let needle = WeakNeedle::from_arc(&target);
        let hash_code = needle.hash_code();

        for i in 0..rewrites {
            let next = Arc::new(value.wrapping_add(i as u64));
            needle.set_value(&next);
            prop_assert_eq!(needle.hash_code(), hash_code);
        }
        needle.free();
        prop_assert_eq!(needle.hash_code(), hash_code);
    }
}
