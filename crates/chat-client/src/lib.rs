//! # chat-client
//!
//! One handle over the rate-limited REST dispatcher, the gateway session and
//! the entity cache. Gateway updates and deletes flow into the cache through
//! [`CacheUpdater`].

pub mod client;
pub mod entity;
pub mod error;
pub mod updater;

pub use client::ChatClient;
pub use entity::{Entity, EntityKey};
pub use error::{ClientError, ClientResult};
pub use updater::{CacheChange, CacheUpdater};
