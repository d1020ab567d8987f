//! All counters use `Relaxed` ordering. Individual counter values are
//! eventually consistent. Cross-counter snapshots may be transiently
//! inconsistent (e.g., donated + declined may briefly lag the number of
//! `donate` calls that have returned). This is acceptable for diagnostic
//! display. Do NOT use these values for pooling or capture decisions.

use crate::sync::atomic::{AtomicIsize, Ordering};

/// Diagnostic-only gauge counter.
///
/// Under contention, subtract-before-add races are tolerated and the raw value
/// may transiently dip below zero. Readers should always use `get()`, which
/// clamps negative values to zero.
pub struct Counter(AtomicIsize);

impl Counter {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    #[inline]
    fn delta(val: usize) -> isize {
        // Diagnostic counters only: clamp absurd deltas instead of panicking.
        std::cmp::min(val, isize::MAX as usize).cast_signed()
    }

    #[inline]
    pub fn add(&self, val: usize) {
        self.0.fetch_add(Self::delta(val), Ordering::Relaxed);
    }

    #[inline]
    pub fn sub(&self, val: usize) {
        self.0.fetch_sub(Self::delta(val), Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed).max(0).cast_unsigned()
    }
}

// Entries accepted into a pool queue
crate::sync::static_atomic! {
    pub static POOL_DONATED: Counter = Counter::new();
}
// Donations skipped because another donor held the pool section
crate::sync::static_atomic! {
    pub static POOL_DECLINED: Counter = Counter::new();
}
// Donations dropped because the queue was full
crate::sync::static_atomic! {
    pub static POOL_OVERFLOWED: Counter = Counter::new();
}
crate::sync::static_atomic! {
    pub static POOL_TAKEN: Counter = Counter::new();
}

// Capture attempts that found every context id claimed
crate::sync::static_atomic! {
    pub static CAPTURE_EXHAUSTED: Counter = Counter::new();
}

// Weak handles currently allocated by needles
crate::sync::static_atomic! {
    pub static WEAK_HANDLES_LIVE: Counter = Counter::new();
}

/// Point-in-time copy of the diagnostic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeedleStats {
    pub pool_donated: usize,
    pub pool_declined: usize,
    pub pool_overflowed: usize,
    pub pool_taken: usize,
    pub capture_exhausted: usize,
    pub weak_handles_live: usize,
}

#[must_use]
pub fn snapshot() -> NeedleStats {
    NeedleStats {
        pool_donated: POOL_DONATED.get(),
        pool_declined: POOL_DECLINED.get(),
        pool_overflowed: POOL_OVERFLOWED.get(),
        pool_taken: POOL_TAKEN.get(),
        capture_exhausted: CAPTURE_EXHAUSTED.get(),
        weak_handles_live: WEAK_HANDLES_LIVE.get(),
    }
}
