use super::ids::next_hash_code;
use super::weak_handle::{Fault, HandleKind, HandleReleased, Payload, WeakHandle};
use crate::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use crate::sync::cell::UnsafeCell;
use crate::sync::hint;
use crate::sync::weak::Arc;
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::trace;

/// `status` value while a writer owns the handle slot.
const WRITER: isize = -1;

/// A needle that does not keep its target alive.
///
/// The target is any caller-owned `Arc<T>`; once the last strong reference
/// goes away the needle reads as dead. Instead of a value the needle can also
/// carry a fault (an error payload, held just as weakly).
///
/// States:
///
/// ```text
///   Alive    handle allocated, value payload still reachable
///   Faulted  handle allocated, fault payload reachable, fault flag set
///   Dead     handle freed or never allocated, or payload dropped
/// ```
///
/// The handle slot is guarded by `status`: readers count themselves in
/// (`status > 0`), a writer swaps `0 -> -1`. A reader therefore never
/// dereferences a handle that a writer is replacing or freeing.
pub struct WeakNeedle<T> {
    handle: UnsafeCell<WeakHandle<T>>,
    status: AtomicIsize,
    fault_expected: AtomicBool,
    managed_disposal: AtomicBool,
    track_resurrection: bool,
    hash_code: u64,
}

// Safety: the handle slot is only touched inside the `status` protocol, and
// `Weak<T>` itself needs `T: Send + Sync` to cross threads.
unsafe impl<T: Send + Sync> Send for WeakNeedle<T> {}
// Safety: see above.
unsafe impl<T: Send + Sync> Sync for WeakNeedle<T> {}

struct ReadGuard<'a>(&'a AtomicIsize);

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

struct WriteGuard<'a>(&'a AtomicIsize);

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::Release);
    }
}

impl<T> WeakNeedle<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracking(false)
    }

    #[must_use]
    pub fn with_tracking(track_resurrection: bool) -> Self {
        Self {
            handle: UnsafeCell::new(WeakHandle::unallocated(HandleKind::from_tracking(
                track_resurrection,
            ))),
            status: AtomicIsize::new(0),
            fault_expected: AtomicBool::new(false),
            managed_disposal: AtomicBool::new(false),
            track_resurrection,
            hash_code: next_hash_code(),
        }
    }

    #[must_use]
    pub fn from_arc(target: &Arc<T>) -> Self {
        Self::from_arc_tracking(target, false)
    }

    #[must_use]
    pub fn from_arc_tracking(target: &Arc<T>, track_resurrection: bool) -> Self {
        let needle = Self::with_tracking(track_resurrection);
        needle.set_target_value(target);
        needle
    }

    #[must_use]
    pub fn track_resurrection(&self) -> bool {
        self.track_resurrection
    }

    #[must_use]
    pub fn handle_kind(&self) -> HandleKind {
        self.with_handle(WeakHandle::kind)
    }

    /// Stable for the needle's whole life, whatever happens to the target.
    #[must_use]
    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }

    /// The live value, or `None` when dead or faulted.
    #[must_use]
    pub fn value(&self) -> Option<Arc<T>> {
        match self.read_target() {
            (Some(Payload::Value(value)), false) => Some(value),
            _ => None,
        }
    }

    /// Probe for a value payload. Never panics; `None` when there is no live
    /// value.
    #[must_use]
    pub fn try_get_value(&self) -> Option<Arc<T>> {
        match self.read_target() {
            (Some(Payload::Value(value)), _) => Some(value),
            _ => None,
        }
    }

    pub fn set_value(&self, value: &Arc<T>) {
        self.set_target_value(value);
    }

    /// Point the needle at `value` and clear any fault.
    pub fn set_target_value(&self, value: &Arc<T>) {
        self.write_target(Payload::Value(Arc::clone(value)), false);
    }

    /// Replace the target with a fault payload.
    pub fn set_target_error(&self, error: Arc<Fault>) {
        self.write_target(Payload::Fault(error), true);
    }

    /// The fault payload, if the needle is faulted and the error is still
    /// reachable. Never raised by the needle itself.
    #[must_use]
    pub fn exception(&self) -> Option<Arc<Fault>> {
        match self.read_target() {
            (Some(Payload::Fault(fault)), true) => Some(fault),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.value().is_some()
    }

    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.exception().is_some()
    }

    /// True after [`free`](Self::free) until the next write.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.managed_disposal.load(Ordering::Acquire)
    }

    /// Release the handle. Idempotent; a later write revives the needle.
    pub fn free(&self) {
        self.lock_exclusive();
        let _guard = WriteGuard(&self.status);
        // Safety: the writer state excludes readers and other writers.
        let handle = crate::sync::unsafe_cell_get_mut!(self.handle);
        release_quietly(handle);
        self.managed_disposal.store(true, Ordering::Release);
    }

    pub fn dispose(&self) {
        self.free();
    }

    /// Value equality: dead matches dead, alive matches alive with an equal
    /// value.
    #[must_use]
    pub fn eq_value(&self, other: &T) -> bool
    where
        T: PartialEq,
    {
        self.value().is_some_and(|value| *value == *other)
    }

    /// Payload and fault flag, taken under one read guard so both come from
    /// the same write.
    fn read_target(&self) -> (Option<Payload<T>>, bool) {
        self.with_handle(|handle| {
            (
                handle.target().ok().flatten(),
                self.fault_expected.load(Ordering::Acquire),
            )
        })
    }

    fn with_handle<R>(&self, f: impl FnOnce(&WeakHandle<T>) -> R) -> R {
        let mut status = self.status.load(Ordering::Relaxed);
        loop {
            if status == WRITER {
                hint::spin_loop();
                status = self.status.load(Ordering::Relaxed);
                continue;
            }
            match self.status.compare_exchange_weak(
                status,
                status + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => status = observed,
            }
        }
        let _guard = ReadGuard(&self.status);
        // Safety: readers are counted in, so no writer holds the slot.
        f(crate::sync::unsafe_cell_get!(self.handle))
    }

    /// Take the writer state. Returns `true` if another reader or writer was
    /// in the way and we had to spin.
    fn lock_exclusive(&self) -> bool {
        let mut contended = false;
        while self
            .status
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            contended = true;
            hint::spin_loop();
        }
        contended
    }

    fn write_target(&self, payload: Payload<T>, faulted: bool) {
        let contended = self.lock_exclusive();
        let _guard = WriteGuard(&self.status);
        // Safety: the writer state excludes readers and other writers.
        let handle = crate::sync::unsafe_cell_get_mut!(self.handle);
        let kind = HandleKind::from_tracking(self.track_resurrection);

        self.fault_expected.store(faulted, Ordering::Release);
        if !contended {
            // Fast path: nobody was looking, allocate a fresh handle.
            release_quietly(handle);
            *handle = WeakHandle::allocate(&payload, kind);
        } else if handle.retarget(&payload).is_err() {
            // Contended and the old handle is gone: allocate fresh, then free
            // whatever was superseded.
            let mut superseded = std::mem::replace(handle, WeakHandle::allocate(&payload, kind));
            release_quietly(&mut superseded);
        }

        if self.managed_disposal.swap(false, Ordering::AcqRel) {
            trace!(hash_code = self.hash_code, "weak needle revived after disposal");
        }
    }
}

fn release_quietly<T>(handle: &mut WeakHandle<T>) {
    if let Err(HandleReleased) = handle.free() {
        trace!("weak handle already released");
    }
}

impl<T> Default for WeakNeedle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<&Arc<T>> for WeakNeedle<T> {
    fn from(target: &Arc<T>) -> Self {
        Self::from_arc(target)
    }
}

impl<T> Drop for WeakNeedle<T> {
    fn drop(&mut self) {
        // Safety: `&mut self` is exclusive.
        let handle = crate::sync::unsafe_cell_get_mut!(self.handle);
        release_quietly(handle);
    }
}

impl<T: PartialEq> PartialEq for WeakNeedle<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.value(), other.value()) {
            (Some(left), Some(right)) => *left == *right,
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: PartialEq> PartialEq<Arc<T>> for WeakNeedle<T> {
    fn eq(&self, other: &Arc<T>) -> bool {
        self.eq_value(other)
    }
}

impl<T> Hash for WeakNeedle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_code.hash(state);
    }
}

impl<T: fmt::Display> fmt::Display for WeakNeedle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(value) => value.fmt(f),
            None => f.write_str("<Dead Needle>"),
        }
    }
}

impl<T> fmt::Debug for WeakNeedle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakNeedle")
            .field("alive", &self.is_alive())
            .field("faulted", &self.is_faulted())
            .field("track_resurrection", &self.track_resurrection)
            .field("hash_code", &self.hash_code)
            .finish()
    }
}
