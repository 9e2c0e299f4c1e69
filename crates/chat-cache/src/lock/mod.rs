//! Keyed locking

mod keyed_lock;

pub use keyed_lock::{KeyedGuard, KeyedLock, DEFAULT_POOL_SIZE};
