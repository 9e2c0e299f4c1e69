//! Entity cache

mod cache;

pub use cache::{EntityCache, EntityHandle, WeakEntityHandle};
