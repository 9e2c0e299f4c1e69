//! Keyed async mutual exclusion
//!
//! One async mutex per key, created on first use. A mutex is live only while
//! some task holds or waits for it; afterwards it goes back to a small pool
//! for reuse by the next key.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Default upper bound on idle mutexes kept for reuse
pub const DEFAULT_POOL_SIZE: usize = 32;

type SlotMutex = Arc<tokio::sync::Mutex<()>>;

struct ActiveSlot {
    mutex: SlotMutex,
    /// Holders plus waiters
    refs: usize,
}

struct LockTable<K> {
    active: HashMap<K, ActiveSlot>,
    pool: Vec<SlotMutex>,
    max_pooled: usize,
}

/// Per-key async lock with pooled lock objects
pub struct KeyedLock<K> {
    table: Arc<Mutex<LockTable<K>>>,
}

impl<K> Clone for KeyedLock<K> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_pooled: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(LockTable {
                active: HashMap::new(),
                pool: Vec::new(),
                max_pooled,
            })),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancel safe: dropping the future while waiting releases the slot.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let (mutex, lease) = self.acquire_slot(key);
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Take `key` only if nobody holds it
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<K>> {
        let (mutex, lease) = self.acquire_slot(key);
        let guard = mutex.try_lock_owned().ok()?;
        Some(KeyedGuard {
            _guard: guard,
            _lease: lease,
        })
    }

    fn acquire_slot(&self, key: K) -> (SlotMutex, Lease<K>) {
        let mut table = self.table.lock();
        let LockTable { active, pool, .. } = &mut *table;

        let slot = active.entry(key.clone()).or_insert_with(|| ActiveSlot {
            mutex: pool.pop().unwrap_or_default(),
            refs: 0,
        });
        slot.refs += 1;
        let mutex = Arc::clone(&slot.mutex);
        drop(table);

        (
            mutex,
            Lease {
                table: Arc::clone(&self.table),
                key,
            },
        )
    }

    /// Keys currently held or waited on
    pub fn active_len(&self) -> usize {
        self.table.lock().active.len()
    }

    /// Idle lock objects ready for reuse
    pub fn pooled_len(&self) -> usize {
        self.table.lock().pool.len()
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.table.lock().active.contains_key(key)
    }
}

impl<K> fmt::Debug for KeyedLock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_struct("KeyedLock")
            .field("active", &table.active.len())
            .field("pooled", &table.pool.len())
            .finish()
    }
}

/// Reference on an active slot; releases it on drop
struct Lease<K: Eq + Hash> {
    table: Arc<Mutex<LockTable<K>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for Lease<K> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let Some(slot) = table.active.get_mut(&self.key) else {
            return;
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return;
        }

        if let Some(slot) = table.active.remove(&self.key) {
            if table.pool.len() < table.max_pooled {
                table.pool.push(slot.mutex);
            }
        }
    }
}

/// Exclusive access to one key, released on drop
pub struct KeyedGuard<K: Eq + Hash> {
    // Unlock before giving the slot back
    _guard: OwnedMutexGuard<()>,
    _lease: Lease<K>,
}

impl<K: Eq + Hash> fmt::Debug for KeyedGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard").finish_non_exhaustive()
    }
}
