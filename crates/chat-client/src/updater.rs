//! Keeps cached entities in line with gateway events

use crate::entity::{Entity, EntityKey};
use async_trait::async_trait;
use chat_cache::EntityCache;
use chat_gateway::{DispatchEvent, EventHandler, GatewayEvent};

/// Effect of one dispatch on the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    /// A live entity took the new payload
    Refreshed(EntityKey),
    /// The entity was deleted and its slot evicted
    Evicted(EntityKey),
    Unchanged,
}

/// Gateway subscriber that refreshes live entities on `*_UPDATE` and evicts
/// them on `*_DELETE`. It never creates entries: an entity nobody holds is
/// not worth keeping.
#[derive(Debug, Clone)]
pub struct CacheUpdater {
    cache: EntityCache<EntityKey, Entity>,
}

impl CacheUpdater {
    pub fn new(cache: EntityCache<EntityKey, Entity>) -> Self {
        Self { cache }
    }

    pub fn apply(&self, event: &DispatchEvent) -> CacheChange {
        let Some(kind) = event.kind else {
            return CacheChange::Unchanged;
        };
        let Some(entity) = kind.entity() else {
            return CacheChange::Unchanged;
        };
        let Some(key) = EntityKey::from_payload(entity, &event.data) else {
            tracing::trace!(event = %event.name, "No entity id in payload");
            return CacheChange::Unchanged;
        };

        if kind.is_delete() {
            if let Some(handle) = self.cache.get(&key) {
                handle.mark_deleted();
            }
            if self.cache.remove(&key) {
                tracing::debug!(%key, event = %event.name, "Evicted deleted entity");
                return CacheChange::Evicted(key);
            }
        } else if kind.is_update() {
            if let Some(handle) = self.cache.get(&key) {
                handle.apply_update(&event.data);
                tracing::trace!(%key, event = %event.name, "Refreshed cached entity");
                return CacheChange::Refreshed(key);
            }
        }
        CacheChange::Unchanged
    }
}

#[async_trait]
impl EventHandler for CacheUpdater {
    async fn on_event(&self, event: GatewayEvent) {
        if let GatewayEvent::Dispatch(dispatch) = event {
            self.apply(&dispatch);
        }
    }
}
