//! WebSocket connector over tokio-tungstenite

use super::{CloseFrame, GatewayConnector, GatewaySocket, Incoming};
use crate::error::SocketError;
use crate::protocol::GatewayMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Protocol version and encoding appended to URLs without a query
const GATEWAY_QUERY: &str = "v=10&encoding=json";

#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }

    fn gateway_url(url: &str) -> String {
        if url.contains('?') {
            url.to_string()
        } else {
            format!("{}/?{GATEWAY_QUERY}", url.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl GatewayConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewaySocket>, SocketError> {
        let url = Self::gateway_url(url);
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SocketError::Connect(e.to_string()))?;

        tracing::debug!(%url, status = response.status().as_u16(), "WebSocket connected");
        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

pub struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl GatewaySocket for TungsteniteSocket {
    async fn send(&mut self, message: &GatewayMessage) -> Result<(), SocketError> {
        let json = message.to_json()?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Incoming, SocketError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(Incoming::Closed(None));
            };

            match message? {
                Message::Text(text) => return Ok(Incoming::Frame(GatewayMessage::from_json(&text)?)),
                Message::Binary(_) => return Err(SocketError::Unsupported("binary frame")),
                Message::Close(frame) => {
                    return Ok(Incoming::Closed(frame.map(|f| CloseFrame {
                        code: u16::from(f.code),
                        reason: f.reason.into_owned(),
                    })));
                }
                // Pings are answered by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), SocketError> {
        let frame = WsCloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TungsteniteSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteSocket").finish_non_exhaustive()
    }
}
