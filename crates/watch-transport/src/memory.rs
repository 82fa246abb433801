//! In-memory transport.
//!
//! [`MemoryConnector`] hands out connections whose far end is a [`MemoryPeer`]
//! accepted from the paired [`MemoryRelay`]. Frames still pass through the
//! wire codec, so a memory link exercises the same encoding as a socket.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use watch_protocol::{codec, Message};

use crate::traits::{Connection, Connector, TransportError};

/// Create a connected connector/relay pair.
#[must_use]
pub fn pair() -> (MemoryConnector, MemoryRelay) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let refusing = Arc::new(AtomicBool::new(false));

    (
        MemoryConnector {
            accept_tx,
            refusing: Arc::clone(&refusing),
        },
        MemoryRelay {
            accept_rx,
            refusing,
        },
    )
}

/// Client side: opens connections to the paired [`MemoryRelay`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refusing: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }

        let (to_relay_tx, to_relay_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            inbound: to_relay_rx,
            outbound: Some(to_client_tx),
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("relay is gone".into()))?;

        debug!(url = %url, "Memory connection established");

        Ok(Box::new(MemoryConnection {
            to_relay: Some(to_relay_tx),
            from_relay: to_client_rx,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Relay side: accepts the connections opened by the paired connector.
#[derive(Debug)]
pub struct MemoryRelay {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    refusing: Arc<AtomicBool>,
}

impl MemoryRelay {
    /// Wait for the next connection.
    ///
    /// Returns `None` once every connector has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Take an already opened connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Make subsequent connection attempts fail.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

/// The relay end of one memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl MemoryPeer {
    /// URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive the next message sent by the client.
    ///
    /// Returns `None` once the client has closed the connection.
    pub async fn recv(&mut self) -> Option<Message> {
        while let Some(text) = self.inbound.recv().await {
            match codec::decode(&text) {
                Ok(message) => return Some(message),
                Err(e) => warn!("Memory peer dropping undecodable message: {}", e),
            }
        }
        None
    }

    /// Receive the next message that is not a keepalive.
    pub async fn recv_skipping_keepalive(&mut self) -> Option<Message> {
        loop {
            match self.recv().await? {
                Message::PingKeepalive => continue,
                message => return Some(message),
            }
        }
    }

    /// Take an already delivered message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        let text = self.inbound.try_recv().ok()?;
        codec::decode(&text).ok()
    }

    /// Send a message to the client.
    ///
    /// Returns `false` if the client is gone.
    pub fn send(&self, message: &Message) -> bool {
        let Some(outbound) = &self.outbound else {
            return false;
        };
        match codec::encode(message) {
            Ok(text) => outbound.send(text).is_ok(),
            Err(e) => {
                warn!("Memory peer failed to encode message: {}", e);
                false
            }
        }
    }

    /// Close the connection from the relay side.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}

/// The client end of one memory connection.
struct MemoryConnection {
    to_relay: Option<mpsc::UnboundedSender<String>>,
    from_relay: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn recv(&mut self) -> Result<Option<Message>, TransportError> {
        while let Some(text) = self.from_relay.recv().await {
            match codec::decode(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("Dropping undecodable message: {}", e),
            }
        }

        self.to_relay = None;
        Ok(None)
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let Some(to_relay) = &self.to_relay else {
            return Err(TransportError::ConnectionClosed);
        };

        let text = codec::encode(message)?;
        to_relay
            .send(text)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.to_relay = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.to_relay.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watch_protocol::VideoState;

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (connector, mut relay) = pair();
        let mut conn = connector.connect("memory://relay").await.unwrap();
        let mut peer = relay.accept().await.unwrap();
        assert_eq!(peer.url(), "memory://relay");

        conn.send(&Message::create_room()).await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::create_room()));

        let state = Message::video_state("abc", VideoState::new(4.0, true));
        assert!(peer.send(&state));
        assert_eq!(conn.recv().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_peer_close_ends_client_stream() {
        let (connector, mut relay) = pair();
        let mut conn = connector.connect("memory://relay").await.unwrap();
        let mut peer = relay.accept().await.unwrap();

        peer.close();
        assert!(conn.recv().await.unwrap().is_none());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_client_close_ends_peer_stream() {
        let (connector, mut relay) = pair();
        let mut conn = connector.connect("memory://relay").await.unwrap();
        let mut peer = relay.accept().await.unwrap();

        conn.close().await.unwrap();
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            conn.send(&Message::ping()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_refusing_relay() {
        let (connector, relay) = pair();
        relay.set_refusing(true);

        let result = connector.connect("memory://relay").await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
