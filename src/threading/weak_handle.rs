use super::stats;
use crate::sync::weak::{Arc, Weak};
use std::fmt;

/// Error payload a needle can carry in place of a value.
pub type Fault = dyn std::error::Error + Send + Sync + 'static;

/// How a weak handle was requested.
///
/// Rust has no finalizer resurrection, so both kinds observe a target the
/// same way: it is reachable exactly while some `Arc` to it is alive. The
/// kind is recorded so callers can still ask for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Weak,
    TrackResurrection,
}

impl HandleKind {
    #[must_use]
    pub fn from_tracking(track_resurrection: bool) -> Self {
        if track_resurrection {
            HandleKind::TrackResurrection
        } else {
            HandleKind::Weak
        }
    }
}

/// Strong view of what a handle points at.
pub(crate) enum Payload<T> {
    Value(Arc<T>),
    Fault(Arc<Fault>),
}

enum WeakPayload<T> {
    Value(Weak<T>),
    Fault(Weak<Fault>),
}

impl<T> WeakPayload<T> {
    fn downgrade(payload: &Payload<T>) -> Self {
        match payload {
            Payload::Value(value) => WeakPayload::Value(Arc::downgrade(value)),
            Payload::Fault(fault) => WeakPayload::Fault(Arc::downgrade(fault)),
        }
    }

    fn upgrade(&self) -> Option<Payload<T>> {
        match self {
            WeakPayload::Value(value) => value.upgrade().map(Payload::Value),
            WeakPayload::Fault(fault) => fault.upgrade().map(Payload::Fault),
        }
    }
}

/// The handle was freed before this operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandleReleased;

/// Weak handle capability: allocate, dereference, retarget, free.
///
/// A freed handle rejects every operation with [`HandleReleased`]; callers
/// decide whether that matters.
pub(crate) struct WeakHandle<T> {
    slot: Option<WeakPayload<T>>,
    kind: HandleKind,
}

impl<T> WeakHandle<T> {
    /// A handle that was never allocated.
    pub(crate) fn unallocated(kind: HandleKind) -> Self {
        Self { slot: None, kind }
    }

    pub(crate) fn allocate(payload: &Payload<T>, kind: HandleKind) -> Self {
        stats::WEAK_HANDLES_LIVE.incr();
        Self {
            slot: Some(WeakPayload::downgrade(payload)),
            kind,
        }
    }

    #[inline]
    pub(crate) fn is_allocated(&self) -> bool {
        self.slot.is_some()
    }

    pub(crate) fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Dereference. `Ok(None)` means the target was dropped.
    pub(crate) fn target(&self) -> Result<Option<Payload<T>>, HandleReleased> {
        self.slot
            .as_ref()
            .map(WeakPayload::upgrade)
            .ok_or(HandleReleased)
    }

    /// Point an allocated handle at a new payload without reallocating it.
    pub(crate) fn retarget(&mut self, payload: &Payload<T>) -> Result<(), HandleReleased> {
        let slot = self.slot.as_mut().ok_or(HandleReleased)?;
        *slot = WeakPayload::downgrade(payload);
        Ok(())
    }

    pub(crate) fn free(&mut self) -> Result<(), HandleReleased> {
        self.slot.take().ok_or(HandleReleased)?;
        stats::WEAK_HANDLES_LIVE.sub(1);
        Ok(())
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if self.slot.is_some() {
            stats::WEAK_HANDLES_LIVE.sub(1);
        }
    }
}

impl<T> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("allocated", &self.is_allocated())
            .field("kind", &self.kind)
            .finish()
    }
}
