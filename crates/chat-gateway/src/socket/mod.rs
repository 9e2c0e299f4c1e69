//! Socket abstraction
//!
//! The session talks to the server through these traits, so tests can drive
//! it with an in-memory socket.

mod tungstenite;

pub use tungstenite::{TungsteniteConnector, TungsteniteSocket};

use crate::error::SocketError;
use crate::protocol::GatewayMessage;
use async_trait::async_trait;

/// Close frame received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// What a socket read produced
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Frame(GatewayMessage),
    /// The server closed the connection; `None` when the stream just ended
    Closed(Option<CloseFrame>),
}

#[async_trait]
pub trait GatewaySocket: Send + 'static {
    async fn send(&mut self, message: &GatewayMessage) -> Result<(), SocketError>;

    /// Next frame. Must be cancel safe: the session polls it inside `select!`.
    async fn recv(&mut self) -> Result<Incoming, SocketError>;

    /// Send a close frame with `code`
    async fn close(&mut self, code: u16) -> Result<(), SocketError>;
}

#[async_trait]
pub trait GatewayConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewaySocket>, SocketError>;
}
