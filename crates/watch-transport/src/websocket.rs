//! WebSocket transport implementation.
//!
//! This module provides the client side of a relay link using tokio-tungstenite.
//! `wss://` URLs need the `tls` feature.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};
use watch_protocol::{codec, Message};

use crate::traits::{Connection, Connector, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for relays reachable over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new WebSocket connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            warn!(url = %url, "WebSocket connect failed: {}", e);
            TransportError::ConnectFailed(e.to_string())
        })?;

        debug!(url = %url, "WebSocket handshake completed");

        Ok(Box::new(WebSocketConnection::new(stream)))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection to the relay.
pub struct WebSocketConnection {
    stream: WsStream,
    is_open: bool,
}

impl WebSocketConnection {
    fn new(stream: WsStream) -> Self {
        Self {
            stream,
            is_open: true,
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => match codec::decode(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => warn!("Dropping undecodable message: {}", e),
                },
                Some(Ok(WsMessage::Binary(data))) => match codec::decode_bytes(&data) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => warn!("Dropping undecodable binary message: {}", e),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = self.stream.send(WsMessage::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) => {
                    debug!("Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed)) => {
                    debug!("Connection closed");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let text = codec::encode(message)?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = WebSocketConnector::new();
        // Port 9 (discard) is not expected to run a WebSocket server.
        let result = connector.connect("ws://127.0.0.1:9/ws").await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[test]
    fn test_connector_name() {
        assert_eq!(WebSocketConnector::new().name(), "websocket");
    }
}
