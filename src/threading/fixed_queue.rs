use super::error::NeedleError;
use crate::sync::atomic::{AtomicUsize, Ordering};
use crate::sync::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;

/// One ring slot. `sequence` says whose turn it is:
///
/// ```text
///   sequence == pos          free, producer for `pos` may write
///   sequence == pos + 1      full, consumer for `pos` may read
///   sequence == pos + cap    free again, for the next lap
/// ```
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free MPMC queue that never grows.
///
/// At capacity `add` hands the item back instead of evicting anything, so
/// the oldest entries are the ones that stay. `try_take` is FIFO.
pub struct FixedSizeQueue<T> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: each slot's value is accessed only by the producer or consumer that
// won the matching position CAS, and hand-off goes through `sequence`.
unsafe impl<T: Send> Send for FixedSizeQueue<T> {}
// Safety: see above.
unsafe impl<T: Send> Sync for FixedSizeQueue<T> {}

impl<T> FixedSizeQueue<T> {
    /// # Errors
    ///
    /// Returns `NeedleError::InvalidArgument` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, NeedleError> {
        if capacity == 0 {
            return Err(NeedleError::InvalidArgument("queue capacity must be non-zero"));
        }
        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Ok(Self {
            slots,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        })
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of queued items; never more than `capacity`.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.capacity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `item`, or give it back if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` when every slot is occupied.
    pub fn add(&self, item: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % self.capacity];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let lag = sequence.wrapping_sub(pos).cast_signed();

            if lag == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the tail CAS for `pos` gives this
                        // thread the slot until `sequence` is bumped.
                        crate::sync::unsafe_cell_get_mut!(slot.value).write(item);
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(observed) => pos = observed,
                }
            } else if lag < 0 {
                // Slot still holds last lap's item: full.
                return Err(item);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue the oldest item, if any.
    pub fn try_take(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % self.capacity];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let lag = sequence.wrapping_sub(pos.wrapping_add(1)).cast_signed();

            if lag == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the head CAS for `pos` gives this
                        // thread the written slot until `sequence` is bumped.
                        let value = crate::sync::unsafe_cell_get_mut!(slot.value);
                        // Safety: the producer wrote it before publishing `pos + 1`.
                        let item = unsafe { value.assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.capacity), Ordering::Release);
                        return Some(item);
                    }
                    Err(observed) => pos = observed,
                }
            } else if lag < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for FixedSizeQueue<T> {
    fn drop(&mut self) {
        while self.try_take().is_some() {}
    }
}

impl<T> fmt::Debug for FixedSizeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedSizeQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
