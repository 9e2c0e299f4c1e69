//! Gateway events
//!
//! Typed event names and the fan-out hub subscribers attach to.

mod event_types;
mod hub;

pub use event_types::{EntityKind, GatewayEventType};
pub use hub::{DisconnectInfo, DispatchEvent, EventHandler, EventHub, EventStream, GatewayEvent};
