//! Value objects - immutable types shared across the client crates

mod snowflake;

pub use snowflake::{Snowflake, SnowflakeParseError};
