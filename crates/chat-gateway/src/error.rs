//! Gateway error types

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors returned to callers of the session handle
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("op code {0} cannot be sent by a client")]
    NotClientOp(crate::protocol::OpCode),
}

/// Errors from a gateway socket
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("socket error: {0}")]
    Io(String),

    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unsupported frame: {0}")]
    Unsupported(&'static str),
}

impl From<tokio_tungstenite::tungstenite::Error> for SocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Io(err.to_string())
    }
}
