//! Cached entities
//!
//! Entities are kept as raw JSON; typed models live above this layer.

use chat_core::Snowflake;
use chat_gateway::EntityKind;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cache key. Members are scoped to their guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: Snowflake,
    pub guild: Option<Snowflake>,
}

impl EntityKey {
    pub const fn new(kind: EntityKind, id: Snowflake) -> Self {
        Self { kind, id, guild: None }
    }

    pub const fn member(guild: Snowflake, user: Snowflake) -> Self {
        Self {
            kind: EntityKind::Member,
            id: user,
            guild: Some(guild),
        }
    }

    pub const fn guild(id: Snowflake) -> Self {
        Self::new(EntityKind::Guild, id)
    }

    pub const fn channel(id: Snowflake) -> Self {
        Self::new(EntityKind::Channel, id)
    }

    pub const fn user(id: Snowflake) -> Self {
        Self::new(EntityKind::User, id)
    }

    /// Key of the entity a dispatch payload refers to
    pub fn from_payload(kind: EntityKind, data: &Value) -> Option<Self> {
        match kind {
            EntityKind::Member => {
                let guild = snowflake(data.get("guild_id"))?;
                let user = snowflake(data.get("user").and_then(|u| u.get("id")))?;
                Some(Self::member(guild, user))
            }
            EntityKind::Role => {
                let id = snowflake(data.get("role").and_then(|r| r.get("id")))
                    .or_else(|| snowflake(data.get("role_id")))?;
                Some(Self::new(kind, id))
            }
            _ => Some(Self::new(kind, snowflake(data.get("id"))?)),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.guild {
            Some(guild) => write!(f, "{:?}:{guild}:{}", self.kind, self.id),
            None => write!(f, "{:?}:{}", self.kind, self.id),
        }
    }
}

fn snowflake(value: Option<&Value>) -> Option<Snowflake> {
    match value? {
        Value::String(s) => Snowflake::parse(s).ok(),
        Value::Number(n) => n.as_u64().map(Snowflake::new),
        _ => None,
    }
}

/// A cached entity; its payload is refreshed in place by update events
pub struct Entity {
    key: EntityKey,
    data: RwLock<Value>,
    deleted: AtomicBool,
}

impl Entity {
    pub fn new(key: EntityKey, data: Value) -> Self {
        Self {
            key,
            data: RwLock::new(data),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// Snapshot of the current payload
    pub fn data(&self) -> Value {
        self.data.read().clone()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.data.read().get(name).cloned()
    }

    /// Merge the fields of a partial payload into the current one
    pub fn apply_update(&self, update: &Value) {
        let mut data = self.data.write();
        match (&mut *data, update) {
            (Value::Object(current), Value::Object(fields)) => {
                for (name, value) in fields {
                    current.insert(name.clone(), value.clone());
                }
            }
            (current, _) => *current = update.clone(),
        }
    }

    /// The entity was deleted on the server
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("key", &self.key)
            .field("deleted", &self.is_deleted())
            .finish_non_exhaustive()
    }
}
