//! Transport abstraction traits for relay links.
//!
//! These traits define the interface every client transport must provide,
//! allowing the relay link to be transport-agnostic.

use async_trait::async_trait;
use thiserror::Error;
use watch_protocol::Message;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish a connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] watch_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something that can open connections to a relay.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the relay at `url`.
    ///
    /// Resolves once the link is established and messages can flow.
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An established, ordered, message-framed duplex link.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next message.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Message>, TransportError>;

    /// Send a message.
    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
