//! # chat-gateway
//!
//! Client side of the real-time gateway: protocol types, the session state
//! machine with heartbeat and resume, and event fan-out.

pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod socket;

pub use error::{GatewayError, GatewayResult, SocketError};
pub use events::{
    DisconnectInfo, DispatchEvent, EntityKind, EventHandler, EventHub, EventStream, GatewayEvent,
    GatewayEventType,
};
pub use protocol::{CloseCode, Disposition, GatewayMessage, OpCode};
pub use session::{ConnectionState, GatewaySession, HeartbeatMonitor, SessionConfig};
pub use socket::{CloseFrame, GatewayConnector, GatewaySocket, Incoming, TungsteniteConnector};
