use super::error::NeedleError;
use super::fixed_queue::FixedSizeQueue;
use super::ids::IdAllocator;
use super::stats;
use std::fmt;
use tracing::trace;

/// Instances kept by a pool when no capacity is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Configuration for [`Pool`]. All fields have sensible defaults.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of idle instances held for reuse. Donations beyond
    /// this are dropped. Default: 16.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

type Recycler<T> = Box<dyn Fn(&mut T) + Send + Sync>;

fn keep_alive<T>(_: &mut T) {}

/// Best-effort cache of reusable instances.
///
/// Donors hand instances back with [`donate`](Self::donate); the recycler
/// resets each one before it is queued. A pool is a cache, not a store of
/// record: a donation can be dropped when another donor is mid-recycle or
/// when the pool is full, and callers must not rely on getting a particular
/// instance back.
pub struct Pool<T> {
    id: usize,
    ids: &'static IdAllocator,
    entries: FixedSizeQueue<T>,
    recycler: Recycler<T>,
}

impl<T> Pool<T> {
    /// Pool with a no-op recycler.
    ///
    /// # Errors
    ///
    /// - `NeedleError::InvalidArgument` if `capacity` is zero.
    /// - `NeedleError::CapacityExhausted` if the global pool id domain is
    ///   used up.
    pub fn new(capacity: usize) -> Result<Self, NeedleError>
    where
        T: 'static,
    {
        Self::with_config(&PoolConfig { capacity }, keep_alive::<T>)
    }

    /// Pool that runs `recycler` on every accepted donation.
    ///
    /// # Errors
    ///
    /// See [`Pool::new`].
    pub fn with_recycler<F>(capacity: usize, recycler: F) -> Result<Self, NeedleError>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::with_config(&PoolConfig { capacity }, recycler)
    }

    /// # Errors
    ///
    /// See [`Pool::new`].
    pub fn with_config<F>(config: &PoolConfig, recycler: F) -> Result<Self, NeedleError>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let entries = FixedSizeQueue::new(config.capacity)?;
        let ids = IdAllocator::global();
        let id = ids.get_id()?;
        Ok(Self {
            id,
            ids,
            entries,
            recycler: Box::new(recycler),
        })
    }

    /// The id guarding this pool's donate section.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recycle `entry` and keep it for reuse.
    ///
    /// Returns `false`, dropping `entry`, if another donor is inside this
    /// pool's section or if the pool is full. Never waits.
    pub fn donate(&self, mut entry: T) -> bool {
        let Some(_section) = self.ids.enter(self.id) else {
            stats::POOL_DECLINED.incr();
            trace!(pool = self.id, "donation declined: pool section busy");
            return false;
        };

        (self.recycler)(&mut entry);
        if self.entries.add(entry).is_err() {
            stats::POOL_OVERFLOWED.incr();
            trace!(pool = self.id, capacity = self.capacity(), "donation dropped: pool full");
            return false;
        }
        stats::POOL_DONATED.incr();
        true
    }

    /// Take the oldest recycled instance, if any.
    pub fn try_get(&self) -> Option<T> {
        let entry = self.entries.try_take();
        if entry.is_some() {
            stats::POOL_TAKEN.incr();
        }
        entry
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        self.ids.release_id(self.id);
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
