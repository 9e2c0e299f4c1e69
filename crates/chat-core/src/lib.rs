//! # chat-core
//!
//! Core value types shared by the REST, gateway and cache crates.
//! This crate has no dependency on any transport or runtime.

pub mod value_objects;

// Re-export commonly used types at crate root
pub use value_objects::{Snowflake, SnowflakeParseError};
