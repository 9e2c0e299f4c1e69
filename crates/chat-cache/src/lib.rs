//! # chat-cache
//!
//! In-memory entity cache for gateway and REST data.
//!
//! ## Features
//!
//! - **Weak retention**: the cache never keeps an entity alive on its own;
//!   once the last [`EntityHandle`] is dropped the slot disappears
//! - **Deduplicated population**: concurrent `get_or_create` calls for one id
//!   run the factory once and share the result
//! - **Pooled keyed locks**: per-id async locks exist only while contended
//!
//! ## Example
//!
//! ```ignore
//! use chat_cache::EntityCache;
//!
//! let cache: EntityCache<Snowflake, Guild> = EntityCache::new();
//! let guild = cache
//!     .get_or_create(guild_id, || async { fetch_guild(guild_id).await })
//!     .await?;
//! ```

pub mod entity;
pub mod lock;

pub use entity::{EntityCache, EntityHandle, WeakEntityHandle};
pub use lock::{KeyedGuard, KeyedLock, DEFAULT_POOL_SIZE};
