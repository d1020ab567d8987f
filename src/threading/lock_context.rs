use super::error::NeedleError;
use super::flag_array::FlagArray;
use super::ids::IdAllocator;
use super::stats;
use crate::sync::atomic::{AtomicUsize, Ordering, fence};
use crate::sync::cell::UnsafeCell;
use crate::sync::hint;
use std::fmt;
use tracing::debug;

/// Participant ids per context when no capacity is given.
pub const DEFAULT_CONTEXT_CAPACITY: usize = 64;

/// Shared value cell coordinated across a small, fixed set of participant ids.
///
/// The cell is sequence-locked:
///
/// ```text
///   seq even  ->  stable, value readable
///   seq odd   ->  write in progress
/// ```
///
/// Readers never wait. A read that lands on an odd sequence, or sees the
/// sequence move underneath it, is declined and the caller keeps whatever it
/// cached last. Writers serialise on the sequence word with a short spin, so
/// concurrent writes are never interleaved byte-wise; which writer lands last
/// is unspecified.
pub struct LockContext<T> {
    ids: IdAllocator,
    seq: AtomicUsize,
    value: UnsafeCell<Option<T>>,
}

// Safety: `value` is only written while the writer holds the odd sequence, and
// reads are validated against the sequence before being handed out.
unsafe impl<T: Send> Send for LockContext<T> {}
// Safety: see above; `T: Copy` values are returned by copy, never by reference.
unsafe impl<T: Send> Sync for LockContext<T> {}

impl<T: Copy> LockContext<T> {
    /// # Errors
    ///
    /// Returns `NeedleError::InvalidArgument` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, NeedleError> {
        Ok(Self {
            ids: IdAllocator::with_capacity(capacity)?,
            seq: AtomicUsize::new(0),
            value: UnsafeCell::new(None),
        })
    }

    /// Create a context whose cell already holds `value`.
    ///
    /// # Errors
    ///
    /// Returns `NeedleError::InvalidArgument` if `capacity` is zero.
    pub fn with_value(capacity: usize, value: T) -> Result<Self, NeedleError> {
        Ok(Self {
            ids: IdAllocator::with_capacity(capacity)?,
            seq: AtomicUsize::new(2),
            value: UnsafeCell::new(Some(value)),
        })
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ids.capacity()
    }

    /// Number of participant ids currently captured.
    #[must_use]
    pub fn captured_count(&self) -> usize {
        self.ids.claimed_count()
    }

    #[must_use]
    pub fn is_captured(&self, id: usize) -> bool {
        id < self.capacity() && self.ids.is_claimed(id)
    }

    /// Claim a free participant id and mark it in `capture`.
    ///
    /// # Errors
    ///
    /// - `NeedleError::InvalidArgument` if `capture` was not sized for this
    ///   context.
    /// - `NeedleError::CapacityExhausted` if every id is already captured.
    ///   Callers treat this as backpressure: retry later or access the value
    ///   without coordination.
    pub fn capture(&self, capture: &mut FlagArray) -> Result<usize, NeedleError> {
        if capture.capacity() != self.capacity() {
            return Err(NeedleError::InvalidArgument(
                "flag array capacity does not match the lock context",
            ));
        }
        match self.ids.get_id() {
            Ok(id) => {
                capture.set(id, true);
                Ok(id)
            }
            Err(e) => {
                stats::CAPTURE_EXHAUSTED.incr();
                debug!(capacity = self.capacity(), "lock context capture exhausted");
                Err(e)
            }
        }
    }

    /// Release `id` if `capture` holds it. Ids not marked in `capture` are
    /// left alone.
    pub fn uncapture(&self, id: usize, capture: &mut FlagArray) {
        if id >= capture.capacity() || !capture.get(id) {
            return;
        }
        capture.set(id, false);
        if self.ids.is_claimed(id) {
            self.ids.release_id(id);
        }
    }

    /// Hand back a claimed `id` whatever `capture` currently marks for it,
    /// clearing the flag if it is still set.
    ///
    /// For owners that track their claims apart from their capture flags,
    /// which may already have been cleared locally.
    pub(crate) fn release_claim(&self, id: usize, capture: &mut FlagArray) {
        if id < capture.capacity() && capture.get(id) {
            capture.set(id, false);
        }
        if self.ids.is_claimed(id) {
            self.ids.release_id(id);
        }
    }

    /// True if some id is captured by a participant other than the owner of
    /// `capture`.
    fn conflicts(&self, capture: &FlagArray) -> bool {
        (0..self.capacity()).any(|id| self.ids.is_claimed(id) && !capture.get(id))
    }

    /// Optimistic read of the shared value.
    ///
    /// Returns `None` when another participant holds a capture, when a write
    /// is in flight (or completed during the read), or when nothing was ever
    /// written. Never blocks and never retries.
    #[must_use]
    pub fn read(&self, capture: &FlagArray) -> Option<T> {
        debug_assert_eq!(capture.capacity(), self.capacity());
        if self.conflicts(capture) {
            return None;
        }

        let seq1 = self.seq.load(Ordering::Acquire);
        if seq1 & 1 != 0 {
            return None;
        }

        // Safety: a racing writer is detected by the sequence re-check below,
        // in which case the copy is discarded.
        let value = *crate::sync::unsafe_cell_get!(self.value);

        fence(Ordering::Acquire);
        let seq2 = self.seq.load(Ordering::Relaxed);
        if seq1 != seq2 {
            return None;
        }
        value
    }

    /// Publish `value` to every participant.
    ///
    /// Spins only while another writer holds the cell.
    pub fn write(&self, value: T) {
        let mut seq = self.seq.load(Ordering::Relaxed);
        loop {
            if seq & 1 != 0 {
                hint::spin_loop();
                seq = self.seq.load(Ordering::Relaxed);
                continue;
            }
            // Even -> odd: this thread now owns the cell.
            match self.seq.compare_exchange_weak(
                seq,
                seq.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => seq = observed,
            }
        }
        fence(Ordering::Release);

        // Safety: the odd sequence excludes other writers.
        *crate::sync::unsafe_cell_get_mut!(self.value) = Some(value);

        // Odd -> even, publishing the value.
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }
}

impl<T: Copy> Default for LockContext<T> {
    fn default() -> Self {
        Self {
            ids: IdAllocator::build(DEFAULT_CONTEXT_CAPACITY),
            seq: AtomicUsize::new(0),
            value: UnsafeCell::new(None),
        }
    }
}

impl<T> fmt::Debug for LockContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockContext")
            .field("capacity", &self.ids.capacity())
            .field("captured", &self.ids.claimed_count())
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::Arc;
    use crate::sync::barrier::Barrier;
    use crate::sync::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            LockContext::<u32>::new(0),
            Err(NeedleError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_before_write_is_none() {
        let context = LockContext::<u64>::new(2).unwrap();
        let flags = FlagArray::new(2);
        assert_eq!(context.read(&flags), None);
    }

    #[test]
    fn test_with_value_is_readable() {
        let context = LockContext::with_value(2, 5u64).unwrap();
        assert_eq!(context.read(&FlagArray::new(2)), Some(5));
    }

    #[test]
    fn test_write_then_read() {
        let context = LockContext::<u64>::new(2).unwrap();
        context.write(11);
        context.write(12);
        assert_eq!(context.read(&FlagArray::new(2)), Some(12));
    }

    #[test]
    fn test_capture_marks_flags_and_exhausts() {
        let _guard = crate::threading::TEST_MUTEX.read().unwrap();
        let context = LockContext::<u8>::new(2).unwrap();
        let mut a = FlagArray::new(2);
        let mut b = FlagArray::new(2);

        let first = context.capture(&mut a).unwrap();
        let second = context.capture(&mut b).unwrap();
        assert_ne!(first, second);
        assert!(a.get(first));
        assert!(b.get(second));
        assert_eq!(context.captured_count(), 2);

        let mut c = FlagArray::new(2);
        assert_eq!(
            context.capture(&mut c),
            Err(NeedleError::CapacityExhausted { capacity: 2 })
        );
        assert!(c.is_empty());

        context.uncapture(first, &mut a);
        assert!(!context.is_captured(first));
        assert!(a.is_empty());
        assert_eq!(context.capture(&mut c), Ok(first));
    }

    #[test]
    fn test_capture_rejects_mismatched_flags() {
        let context = LockContext::<u8>::new(4).unwrap();
        let mut flags = FlagArray::new(3);
        assert!(matches!(
            context.capture(&mut flags),
            Err(NeedleError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_uncapture_ignores_foreign_ids() {
        let _guard = crate::threading::TEST_MUTEX.read().unwrap();
        let context = LockContext::<u8>::new(2).unwrap();
        let mut owner = FlagArray::new(2);
        let mut other = FlagArray::new(2);
        let id = context.capture(&mut owner).unwrap();

        context.uncapture(id, &mut other);
        assert!(context.is_captured(id));
    }

    #[test]
    fn test_foreign_capture_declines_read() {
        let _guard = crate::threading::TEST_MUTEX.read().unwrap();
        let context = LockContext::<u32>::new(2).unwrap();
        context.write(1);

        let mut holder = FlagArray::new(2);
        let reader = FlagArray::new(2);
        let id = context.capture(&mut holder).unwrap();

        // The holder may read; everybody else keeps their cache.
        assert_eq!(context.read(&holder), Some(1));
        assert_eq!(context.read(&reader), None);

        context.uncapture(id, &mut holder);
        assert_eq!(context.read(&reader), Some(1));
    }

    #[test]
    fn test_concurrent_capture_one_exhausted() {
        let _guard = crate::threading::TEST_MUTEX.read().unwrap();
        const CAPACITY: usize = 4;
        let context = Arc::new(LockContext::<u32>::new(CAPACITY).unwrap());
        let barrier = Arc::new(Barrier::new(CAPACITY + 1));

        let handles: Vec<_> = (0..=CAPACITY)
            .map(|_| {
                let context = Arc::clone(&context);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut flags = FlagArray::new(CAPACITY);
                    barrier.wait();
                    context.capture(&mut flags)
                })
            })
            .collect();

        let exhausted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, Err(NeedleError::CapacityExhausted { .. })))
            .count();
        assert_eq!(exhausted, 1);
    }

    #[test]
    fn test_concurrent_writes_never_tear() {
        // Each writer stores a pair whose halves always match; a torn read
        // would surface as mismatched halves.
        let context = Arc::new(LockContext::<(u64, u64)>::new(1).unwrap());
        context.write((0, 0));

        let writers: Vec<_> = (1..=2u64)
            .map(|seed| {
                let context = Arc::clone(&context);
                thread::spawn(move || {
                    for i in 0..5_000u64 {
                        let v = seed * 1_000_000 + i;
                        context.write((v, v));
                    }
                })
            })
            .collect();

        let flags = FlagArray::new(1);
        let mut observed = 0usize;
        for _ in 0..20_000 {
            if let Some((a, b)) = context.read(&flags) {
                assert_eq!(a, b, "torn read");
                observed += 1;
            }
        }
        for w in writers {
            w.join().unwrap();
        }
        assert!(observed > 0 || context.read(&flags).is_some());
    }
}
