//! Weak-reference entity cache
//!
//! The cache maps ids to entities it does not own. An entity stays reachable
//! through the cache exactly as long as some [`EntityHandle`] keeps it alive;
//! dropping the last handle removes the slot.

use crate::lock::KeyedLock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

struct CacheShared<K: Eq + Hash, V> {
    slots: Mutex<HashMap<K, Weak<Entry<K, V>>>>,
    locks: KeyedLock<K>,
}

struct Entry<K: Eq + Hash, V> {
    key: K,
    value: V,
    handles: AtomicUsize,
    cache: Weak<CacheShared<K, V>>,
}

impl<K: Eq + Hash, V> Drop for Entry<K, V> {
    fn drop(&mut self) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let mut slots = cache.slots.lock();
        // The slot may already point at a newer entry for the same key
        let ours = slots
            .get(&self.key)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), &*self));
        if ours {
            slots.remove(&self.key);
        }
    }
}

/// Ref-counted handle to a cached entity
pub struct EntityHandle<K: Eq + Hash, V> {
    entry: Arc<Entry<K, V>>,
}

impl<K: Eq + Hash, V> EntityHandle<K, V> {
    fn new(entry: Arc<Entry<K, V>>) -> Self {
        entry.handles.fetch_add(1, Ordering::AcqRel);
        Self { entry }
    }

    pub fn key(&self) -> &K {
        &self.entry.key
    }

    /// Number of live handles to this entity
    pub fn handle_count(&self) -> usize {
        self.entry.handles.load(Ordering::Acquire)
    }

    /// Both handles refer to the same entity instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Non-owning reference that does not keep the entity alive
    pub fn downgrade(&self) -> WeakEntityHandle<K, V> {
        WeakEntityHandle {
            entry: Arc::downgrade(&self.entry),
        }
    }
}

impl<K: Eq + Hash, V> Clone for EntityHandle<K, V> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.entry))
    }
}

impl<K: Eq + Hash, V> Drop for EntityHandle<K, V> {
    fn drop(&mut self) {
        self.entry.handles.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<K: Eq + Hash, V> Deref for EntityHandle<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.entry.value
    }
}

impl<K: Eq + Hash + fmt::Debug, V: fmt::Debug> fmt::Debug for EntityHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("key", &self.entry.key)
            .field("value", &self.entry.value)
            .field("handles", &self.handle_count())
            .finish()
    }
}

/// Weak counterpart of [`EntityHandle`]
pub struct WeakEntityHandle<K: Eq + Hash, V> {
    entry: Weak<Entry<K, V>>,
}

impl<K: Eq + Hash, V> WeakEntityHandle<K, V> {
    pub fn upgrade(&self) -> Option<EntityHandle<K, V>> {
        self.entry.upgrade().map(EntityHandle::new)
    }
}

impl<K: Eq + Hash, V> Clone for WeakEntityHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            entry: Weak::clone(&self.entry),
        }
    }
}

/// Id-keyed cache of entities owned by their handles
pub struct EntityCache<K: Eq + Hash, V> {
    shared: Arc<CacheShared<K, V>>,
}

impl<K: Eq + Hash, V> Clone for EntityCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> Default for EntityCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EntityCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_lock_pool(crate::lock::DEFAULT_POOL_SIZE)
    }

    /// Cache whose keyed lock keeps at most `pool_size` idle lock objects
    pub fn with_lock_pool(pool_size: usize) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                slots: Mutex::new(HashMap::new()),
                locks: KeyedLock::new(pool_size),
            }),
        }
    }

    /// Live entity for `key`; never waits
    pub fn get(&self, key: &K) -> Option<EntityHandle<K, V>> {
        // Upgrade under the lock, but let any strong ref go after releasing it:
        // the last drop re-enters `slots` from `Entry::drop`.
        let entry = self.shared.slots.lock().get(key).and_then(Weak::upgrade);
        entry.map(EntityHandle::new)
    }

    /// Live entity for `key`, or the one built by `factory`.
    ///
    /// Concurrent callers for the same key wait for the first one; `factory`
    /// runs at most once per key at a time and only if the entity is absent
    /// after taking the key's lock. A failed factory caches nothing.
    pub async fn get_or_create<F, Fut, E>(&self, key: K, factory: F) -> Result<EntityHandle<K, V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(handle) = self.get(&key) {
            return Ok(handle);
        }

        let _guard = self.shared.locks.lock(key.clone()).await;
        if let Some(handle) = self.get(&key) {
            return Ok(handle);
        }

        let value = factory().await?;
        Ok(self.store(key, value))
    }

    /// Store `value` under `key`, replacing any live entity
    pub fn insert(&self, key: K, value: V) -> EntityHandle<K, V> {
        self.store(key, value)
    }

    fn store(&self, key: K, value: V) -> EntityHandle<K, V> {
        let entry = Arc::new(Entry {
            key: key.clone(),
            value,
            handles: AtomicUsize::new(0),
            cache: Arc::downgrade(&self.shared),
        });
        // The replaced Weak is dropped outside the lock with the statement
        let _replaced = self.shared.slots.lock().insert(key, Arc::downgrade(&entry));
        EntityHandle::new(entry)
    }

    /// Explicit eviction; live handles keep their entity
    pub fn remove(&self, key: &K) -> bool {
        self.shared.slots.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of cached entities
    pub fn len(&self) -> usize {
        self.shared.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys with a population currently in progress or awaited
    pub fn populating(&self) -> usize {
        self.shared.locks.active_len()
    }

    pub fn keyed_lock(&self) -> &KeyedLock<K> {
        &self.shared.locks
    }
}

impl<K: Eq + Hash, V> fmt::Debug for EntityCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("entries", &self.shared.slots.lock().len())
            .finish()
    }
}
