//! Client error types

use chat_common::ConfigError;
use chat_gateway::GatewayError;
use chat_rest::{RestError, TransportError};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
