use fixedbitset::FixedBitSet;

/// Fixed-capacity set of boolean flags keyed by small integer ids.
///
/// Has no synchronisation of its own. Each `NeedleLock` owns one and the
/// capture protocol serialises access to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlagArray {
    bits: FixedBitSet,
}

impl FlagArray {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(capacity),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bits.len()
    }

    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        self.check(index);
        self.bits.contains(index)
    }

    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        self.check(index);
        self.bits.set(index, value);
    }

    /// Indices currently set, ascending. Each call starts a fresh pass.
    pub fn flags(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.ones()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.count_ones(..)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_clear()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    #[inline]
    fn check(&self, index: usize) {
        assert!(
            index < self.bits.len(),
            "FlagArray: index {index} out of range for capacity {}",
            self.bits.len()
        );
    }
}
