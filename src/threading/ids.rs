use super::error::NeedleError;
use crate::sync::OnceLock;
use crate::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::fmt;

/// Size of the process-wide id domain handed out to pools.
pub const GLOBAL_ID_CAPACITY: usize = 4096;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-capacity domain of small integer ids.
///
/// Two bitmaps share the id space:
///
/// ```text
///   claimed   bit i set  ->  id i is owned by someone (get_id .. release_id)
///   sections  bit i set  ->  id i's critical section is held (enter .. drop)
/// ```
///
/// Neither path ever parks a thread. `get_id` retries its CAS only while the
/// word it targets still has a free bit, and `enter` is a single `fetch_or`:
/// if the bit was already set the caller is told to skip its work.
pub struct IdAllocator {
    claimed: Box<[AtomicU64]>,
    sections: Box<[AtomicU64]>,
    capacity: usize,
    live: AtomicUsize,
}

static GLOBAL_IDS: OnceLock<IdAllocator> = OnceLock::new();

crate::sync::static_atomic! {
    static NEXT_HASH_CODE: AtomicU64 = AtomicU64::new(0);
}

/// Next value of the process-wide hash-code counter.
///
/// Starts at 0, increments by one per call and is never reset, so no two
/// needles created in one process share a code.
#[inline]
pub fn next_hash_code() -> u64 {
    NEXT_HASH_CODE.fetch_add(1, Ordering::Relaxed)
}

impl IdAllocator {
    /// Create a domain holding ids `0..capacity`.
    ///
    /// # Errors
    ///
    /// Returns `NeedleError::InvalidArgument` if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Self, NeedleError> {
        if capacity == 0 {
            return Err(NeedleError::InvalidArgument("id allocator capacity must be non-zero"));
        }
        Ok(Self::build(capacity))
    }

    // `capacity` must be non-zero.
    pub(crate) fn build(capacity: usize) -> Self {
        let words = capacity.div_ceil(WORD_BITS);
        Self {
            claimed: (0..words).map(|_| AtomicU64::new(0)).collect(),
            sections: (0..words).map(|_| AtomicU64::new(0)).collect(),
            capacity,
            live: AtomicUsize::new(0),
        }
    }

    /// The process-wide domain used by pools. Created on first use and never
    /// torn down.
    pub fn global() -> &'static IdAllocator {
        GLOBAL_IDS.get_or_init(|| Self::build(GLOBAL_ID_CAPACITY))
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids currently claimed. Eventually consistent.
    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Mask of the bits in `word` that map to real ids.
    #[inline]
    fn usable_mask(&self, word: usize) -> u64 {
        let remaining = self.capacity - word * WORD_BITS;
        if remaining >= WORD_BITS {
            u64::MAX
        } else {
            (1u64 << remaining) - 1
        }
    }

    #[inline]
    fn locate(&self, id: usize) -> (usize, u64) {
        assert!(
            id < self.capacity,
            "IdAllocator: id {id} out of range for capacity {}",
            self.capacity
        );
        (id / WORD_BITS, 1u64 << (id % WORD_BITS))
    }

    /// Claim the lowest free id.
    ///
    /// # Errors
    ///
    /// Returns `NeedleError::CapacityExhausted` if every id is claimed. Ids
    /// only move from free to claimed inside this call, so when `n + 1`
    /// callers race over `n` ids exactly one of them sees exhaustion.
    pub fn get_id(&self) -> Result<usize, NeedleError> {
        for (word_index, word) in self.claimed.iter().enumerate() {
            let usable = self.usable_mask(word_index);
            let mut current = word.load(Ordering::Relaxed);
            loop {
                let free = !current & usable;
                if free == 0 {
                    break;
                }
                let bit = free & free.wrapping_neg();
                match word.compare_exchange_weak(
                    current,
                    current | bit,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        self.live.fetch_add(1, Ordering::Relaxed);
                        return Ok(word_index * WORD_BITS + bit.trailing_zeros() as usize);
                    }
                    Err(observed) => current = observed,
                }
            }
        }
        Err(NeedleError::CapacityExhausted {
            capacity: self.capacity,
        })
    }

    /// Return `id` to the domain so a later `get_id` can reuse it.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the domain.
    pub fn release_id(&self, id: usize) {
        let (word, bit) = self.locate(id);
        self.sections[word].fetch_and(!bit, Ordering::Release);
        let previous = self.claimed[word].fetch_and(!bit, Ordering::Release);
        if previous & bit != 0 {
            self.live.fetch_sub(1, Ordering::Relaxed);
        } else {
            debug_assert!(false, "IdAllocator::release_id: id {id} was not claimed");
        }
    }

    /// # Panics
    ///
    /// Panics if `id` is outside the domain.
    #[must_use]
    pub fn is_claimed(&self, id: usize) -> bool {
        let (word, bit) = self.locate(id);
        self.claimed[word].load(Ordering::Acquire) & bit != 0
    }

    /// Try to enter the critical section keyed by `id`.
    ///
    /// Returns `None` without waiting if the section is already held; the
    /// caller treats its guarded work as skipped. Dropping the returned
    /// [`Section`] leaves the section.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the domain.
    #[must_use]
    pub fn enter(&self, id: usize) -> Option<Section<'_>> {
        let (word, bit) = self.locate(id);
        let previous = self.sections[word].fetch_or(bit, Ordering::Acquire);
        if previous & bit != 0 {
            return None;
        }
        Some(Section {
            owner: self,
            word,
            bit,
        })
    }

    fn leave(&self, word: usize, bit: u64) {
        self.sections[word].fetch_and(!bit, Ordering::Release);
    }
}

impl fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("capacity", &self.capacity)
            .field("claimed", &self.claimed_count())
            .finish_non_exhaustive()
    }
}

/// A held critical section of an [`IdAllocator`] id. Leaves on drop.
#[must_use = "the section is left as soon as the guard is dropped"]
pub struct Section<'a> {
    owner: &'a IdAllocator,
    word: usize,
    bit: u64,
}

impl Section<'_> {
    #[must_use]
    pub fn id(&self) -> usize {
        self.word * WORD_BITS + self.bit.trailing_zeros() as usize
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        self.owner.leave(self.word, self.bit);
    }
}

impl fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section").field("id", &self.id()).finish()
    }
}
