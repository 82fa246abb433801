//! # watch-transport
//!
//! Client-side transport for the watch-together relay.
//!
//! - **Connector / Connection** - Transport-agnostic traits for one duplex,
//!   message-framed link
//! - **WebSocket** - The production connector (tokio-tungstenite)
//! - **Memory** - An in-process connector with a scriptable relay end, used by
//!   tests and simulations
//! - **RelayLink** - Owns the single link of a client: connection state,
//!   room request on open, keep-alive heartbeat and event reporting
//!
//! ```rust,ignore
//! use watch_transport::{LinkConfig, RelayLink, WebSocketConnector};
//!
//! let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let connector = Arc::new(WebSocketConnector::new());
//! let mut link = RelayLink::new(connector, LinkConfig::default(), events_tx);
//! link.open(None, true);
//! while let Some(event) = events.recv().await {
//!     if let Some(event) = link.accept_event(event) {
//!         // Process event
//!     }
//! }
//! ```

pub mod link;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use link::{ConnectionState, LinkConfig, LinkEvent, RelayLink};
pub use memory::{MemoryConnector, MemoryPeer, MemoryRelay};
pub use traits::{Connection, Connector, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
