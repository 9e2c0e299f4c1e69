//! Integration test utilities
//!
//! In-memory HTTP transport and gateway socket for driving the dispatcher,
//! the gateway session and the client facade without a network.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
