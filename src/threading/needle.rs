use super::needle_lock::NeedleLock;
use super::weak_needle::WeakNeedle;
use crate::sync::weak::Arc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Read side shared by every needle: a snapshot of the target, if any.
pub trait Needle {
    type Target;

    /// The target as currently visible to this needle, or `None` when dead.
    fn target(&self) -> Option<Self::Target>;

    fn is_alive(&self) -> bool;
}

impl<T: Copy> Needle for NeedleLock<T> {
    type Target = T;

    /// The locally cached value; does not consult the context.
    fn target(&self) -> Option<T> {
        self.cached()
    }

    fn is_alive(&self) -> bool {
        NeedleLock::is_alive(self)
    }
}

impl<T> Needle for WeakNeedle<T> {
    type Target = Arc<T>;

    fn target(&self) -> Option<Arc<T>> {
        self.value()
    }

    fn is_alive(&self) -> bool {
        WeakNeedle::is_alive(self)
    }
}

/// Caller-supplied equality for keyed lookups.
pub trait EqualityComparer<T: ?Sized> {
    fn equals(&self, left: &T, right: &T) -> bool;

    fn hash_of(&self, value: &T) -> u64;
}

/// `Eq` + `Hash` of the type itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultComparer;

impl<T: Eq + Hash + ?Sized> EqualityComparer<T> for DefaultComparer {
    fn equals(&self, left: &T, right: &T) -> bool {
        left == right
    }

    fn hash_of(&self, value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

/// Compares needles through their targets.
///
/// A dead needle converts to "no target": two dead needles are equal, a dead
/// and a live one never are, and two live ones defer to the inner comparer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeedleComparer<C> {
    inner: C,
}

impl<C> NeedleComparer<C> {
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn equals<N>(&self, left: &N, right: &N) -> bool
    where
        N: Needle,
        C: EqualityComparer<N::Target>,
    {
        match (left.target(), right.target()) {
            (Some(l), Some(r)) => self.inner.equals(&l, &r),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn hash_of<N>(&self, needle: &N) -> u64
    where
        N: Needle,
        C: EqualityComparer<N::Target>,
    {
        needle.target().map_or(0, |target| self.inner.hash_of(&target))
    }
}
