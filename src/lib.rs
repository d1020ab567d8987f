pub(crate) mod sync;

// public module: contains implementation details (hidden via pub(crate))
// and TEST_MUTEX (public for tests)
pub mod threading;

// flags/ids
pub use threading::flag_array::FlagArray;
pub use threading::ids::{GLOBAL_ID_CAPACITY, IdAllocator, Section, next_hash_code};

// needles
pub use threading::lock_context::{DEFAULT_CONTEXT_CAPACITY, LockContext};
pub use threading::needle::{DefaultComparer, EqualityComparer, Needle, NeedleComparer};
pub use threading::needle_lock::NeedleLock;
pub use threading::weak_handle::{Fault, HandleKind};
pub use threading::weak_needle::WeakNeedle;

// pooling
pub use threading::fixed_queue::FixedSizeQueue;
pub use threading::pool::{DEFAULT_POOL_CAPACITY, Pool, PoolConfig};

// stats
pub use threading::stats::{NeedleStats, snapshot as stats_snapshot};

// errors
pub use threading::error::NeedleError;
