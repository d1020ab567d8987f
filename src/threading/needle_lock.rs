use super::error::NeedleError;
use super::flag_array::FlagArray;
use super::ids::next_hash_code;
use super::lock_context::LockContext;
use crate::sync::Arc;
use crate::sync::atomic::{Ordering, fence};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One participant's handle into a shared [`LockContext`].
///
/// The lock keeps a local copy of the value. Reads go through the context
/// and refresh the copy when the context allows it; otherwise the last copy
/// is returned. Writes update the copy and publish it to the context, last
/// writer wins.
///
/// `capture`/`uncapture` only touch this handle's own flags. Ids claimed
/// from the context through [`acquire`](Self::acquire) are tracked
/// separately and handed back on drop.
pub struct NeedleLock<T: Copy> {
    context: Arc<LockContext<T>>,
    target: Option<T>,
    capture: FlagArray,
    acquired: FlagArray,
    hash_code: u64,
}

impl<T: Copy> NeedleLock<T> {
    #[must_use]
    pub fn new(context: Arc<LockContext<T>>) -> Self {
        let capacity = context.capacity();
        Self {
            context,
            target: None,
            capture: FlagArray::new(capacity),
            acquired: FlagArray::new(capacity),
            hash_code: next_hash_code(),
        }
    }

    /// Bind to `context` with an initial local value. The hash code is taken
    /// from `target` and does not change afterwards.
    #[must_use]
    pub fn with_target(context: Arc<LockContext<T>>, target: T) -> Self
    where
        T: Hash,
    {
        let capacity = context.capacity();
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        Self {
            context,
            target: Some(target),
            capture: FlagArray::new(capacity),
            acquired: FlagArray::new(capacity),
            hash_code: hasher.finish(),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<LockContext<T>> {
        &self.context
    }

    /// Current value: the context's, when it lets this participant read,
    /// otherwise the last value this lock saw.
    pub fn value(&mut self) -> Option<T> {
        if let Some(value) = self.context.read(&self.capture) {
            self.target = Some(value);
        }
        fence(Ordering::Acquire);
        self.target
    }

    /// Store locally and publish to every participant of the context.
    pub fn set_value(&mut self, value: T) {
        self.target = Some(value);
        self.context.write(value);
    }

    /// The locally cached value, without consulting the context.
    #[must_use]
    pub fn cached(&self) -> Option<T> {
        self.target
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.target.is_some()
    }

    /// Mark `id` in this lock's capture flags.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the context capacity.
    pub fn capture(&mut self, id: usize) {
        self.capture.set(id, true);
    }

    /// Clear `id` from this lock's capture flags.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the context capacity.
    pub fn uncapture(&mut self, id: usize) {
        self.capture.set(id, false);
    }

    /// Ids currently marked in this lock's capture flags.
    pub fn captured(&self) -> impl Iterator<Item = usize> + '_ {
        self.capture.flags()
    }

    /// Claim a participant id from the context and mark it captured.
    ///
    /// # Errors
    ///
    /// Returns `NeedleError::CapacityExhausted` if the context has no free id.
    pub fn acquire(&mut self) -> Result<usize, NeedleError> {
        let id = self.context.capture(&mut self.capture)?;
        self.acquired.set(id, true);
        Ok(id)
    }

    /// Hand an id obtained from [`acquire`](Self::acquire) back to the
    /// context. Returns `false` if this lock did not acquire `id`.
    pub fn release(&mut self, id: usize) -> bool {
        if id >= self.acquired.capacity() || !self.acquired.get(id) {
            return false;
        }
        self.acquired.set(id, false);
        self.context.release_claim(id, &mut self.capture);
        true
    }

    /// Drop the cached value if no capture is outstanding.
    ///
    /// Other participants' views are unaffected.
    pub fn free(&mut self) {
        if self.capture.is_empty() {
            self.target = None;
        }
    }

    #[must_use]
    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }
}

impl<T: Copy> Drop for NeedleLock<T> {
    fn drop(&mut self) {
        let held: Vec<usize> = self.acquired.flags().collect();
        for id in held {
            self.context.release_claim(id, &mut self.capture);
        }
    }
}

impl<T: Copy + PartialEq> PartialEq for NeedleLock<T> {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl<T: Copy> Hash for NeedleLock<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_code.hash(state);
    }
}

impl<T: Copy + fmt::Display> fmt::Display for NeedleLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(value) => value.fmt(f),
            None => f.write_str("<Dead Needle>"),
        }
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for NeedleLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeedleLock")
            .field("target", &self.target)
            .field("captured", &self.capture.count())
            .field("hash_code", &self.hash_code)
            .finish()
    }
}
