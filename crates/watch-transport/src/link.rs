//! The relay link: one connection per client.
//!
//! A [`RelayLink`] is owned by the client's event loop. Opening it spawns a
//! task that connects, sends the room request, starts the keep-alive
//! heartbeat and reports [`LinkEvent`]s back over a channel. The owner feeds
//! those events into [`RelayLink::accept_event`], which updates the
//! connection state and filters out events of replaced connections.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use watch_protocol::{Message, RoomId};

use crate::traits::{Connection, Connector};

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default keep-alive interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Keep-alive intervals below this are raised to it.
const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// State of the relay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Connecting, room request not sent yet.
    Connecting,
    /// Connected and room request sent.
    Connected,
}

/// Relay link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Relay endpoint.
    pub url: String,
    /// Interval between keep-alive messages.
    pub keepalive_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// Something that happened on a connection.
///
/// Every event carries the generation of the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connected and the room request was sent.
    Opened {
        /// Connection generation.
        generation: u64,
    },
    /// A message arrived from the relay.
    Message {
        /// Connection generation.
        generation: u64,
        /// The message.
        message: Message,
    },
    /// The connection closed or failed. Both are treated the same.
    Closed {
        /// Connection generation.
        generation: u64,
        /// Why the connection ended.
        reason: String,
    },
}

impl LinkEvent {
    /// Generation of the connection that produced this event.
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            LinkEvent::Opened { generation }
            | LinkEvent::Message { generation, .. }
            | LinkEvent::Closed { generation, .. } => *generation,
        }
    }
}

/// The single link between a client and the relay.
pub struct RelayLink {
    connector: Arc<dyn Connector>,
    config: LinkConfig,
    events: mpsc::UnboundedSender<LinkEvent>,
    state: ConnectionState,
    /// Room the current connection is for. Replaced by the relay-assigned ID
    /// once a room is confirmed.
    room: Option<RoomId>,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl RelayLink {
    /// Create a disconnected link.
    ///
    /// Events of every connection opened later are sent to `events`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        config: LinkConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            connector,
            config,
            events,
            state: ConnectionState::Disconnected,
            room: None,
            generation: 0,
            outbound: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether messages can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Room of the current connection.
    #[must_use]
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Adopt the room the relay confirmed.
    pub fn set_room(&mut self, room: RoomId) {
        self.room = Some(room);
    }

    /// Generation of the current connection.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open a connection for `room`, as host or joiner.
    ///
    /// Does nothing if already connected for the same room. Otherwise any
    /// existing connection is torn down and a new one is started. Must be
    /// called from within a tokio runtime.
    ///
    /// Returns `true` if a new connection was started.
    pub fn open(&mut self, room: Option<RoomId>, as_host: bool) -> bool {
        if self.state == ConnectionState::Connected && self.room == room {
            debug!(room = ?room, "Link already connected for room");
            return false;
        }

        self.teardown();
        self.generation += 1;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = LinkTask {
            connector: Arc::clone(&self.connector),
            url: self.config.url.clone(),
            request: Message::room_request(room.as_ref(), as_host),
            keepalive_interval: self.config.keepalive_interval,
            generation: self.generation,
            keepalive_handle: outbound_tx.downgrade(),
            outbound: outbound_rx,
            events: self.events.clone(),
        };

        self.outbound = Some(outbound_tx);
        self.room = room;
        self.state = ConnectionState::Connecting;

        info!(
            url = %self.config.url,
            transport = self.connector.name(),
            generation = self.generation,
            as_host,
            "Opening relay link"
        );

        tokio::spawn(task.run());
        true
    }

    /// Send a message if connected. Otherwise the message is dropped.
    ///
    /// Returns `true` if the message was handed to the connection.
    pub fn send(&self, message: Message) -> bool {
        if self.state != ConnectionState::Connected {
            trace!(kind = message.kind(), "Link not connected, dropping message");
            return false;
        }

        match &self.outbound {
            Some(outbound) => outbound.send(message).is_ok(),
            None => false,
        }
    }

    /// Apply an event reported by a connection task.
    ///
    /// Returns the event if it belongs to the current connection, `None` if
    /// it came from a connection that has since been replaced.
    pub fn accept_event(&mut self, event: LinkEvent) -> Option<LinkEvent> {
        if event.generation() != self.generation {
            trace!(
                generation = event.generation(),
                current = self.generation,
                "Ignoring event from stale connection"
            );
            return None;
        }

        match &event {
            LinkEvent::Opened { .. } => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    debug!(generation = self.generation, "Relay link connected");
                }
            }
            LinkEvent::Message { .. } => {}
            LinkEvent::Closed { reason, .. } => {
                info!(generation = self.generation, reason = %reason, "Relay link closed");
                self.state = ConnectionState::Disconnected;
                self.outbound = None;
                self.room = None;
            }
        }

        Some(event)
    }

    /// Close the link. No event is reported for the closed connection.
    pub fn close(&mut self) {
        self.teardown();
        self.generation += 1;
        self.room = None;
    }

    fn teardown(&mut self) {
        if self.outbound.take().is_some() {
            debug!(generation = self.generation, "Tearing down relay link");
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Everything a connection task owns.
struct LinkTask {
    connector: Arc<dyn Connector>,
    url: String,
    request: Message,
    keepalive_interval: Duration,
    generation: u64,
    keepalive_handle: mpsc::WeakUnboundedSender<Message>,
    outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkTask {
    async fn run(mut self) {
        let reason = self.drive().await;
        debug!(generation = self.generation, reason = %reason, "Link task finished");

        // The owner may already be gone.
        let _ = self.events.send(LinkEvent::Closed {
            generation: self.generation,
            reason,
        });
    }

    async fn drive(&mut self) -> String {
        // Dropping the sender side before we are connected aborts the attempt.
        let connected = tokio::select! {
            result = self.connector.connect(&self.url) => result,
            _ = self.outbound.recv() => return "link closed before connecting".to_string(),
        };

        let mut conn = match connected {
            Ok(conn) => conn,
            Err(e) => return e.to_string(),
        };

        if let Err(e) = conn.send(&self.request).await {
            return e.to_string();
        }

        if self
            .events
            .send(LinkEvent::Opened {
                generation: self.generation,
            })
            .is_err()
        {
            close_quietly(conn.as_mut()).await;
            return "link owner dropped".to_string();
        }

        tokio::spawn(keepalive(
            self.keepalive_handle.clone(),
            self.keepalive_interval,
            self.generation,
        ));

        loop {
            tokio::select! {
                biased;

                outbound = self.outbound.recv() => match outbound {
                    Some(message) => {
                        if let Err(e) = conn.send(&message).await {
                            warn!(generation = self.generation, error = %e, "Send failed");
                            return e.to_string();
                        }
                    }
                    None => {
                        close_quietly(conn.as_mut()).await;
                        return "link closed".to_string();
                    }
                },

                inbound = conn.recv() => match inbound {
                    Ok(Some(message)) => {
                        let event = LinkEvent::Message {
                            generation: self.generation,
                            message,
                        };
                        if self.events.send(event).is_err() {
                            close_quietly(conn.as_mut()).await;
                            return "link owner dropped".to_string();
                        }
                    }
                    Ok(None) => return "connection closed".to_string(),
                    Err(e) => return e.to_string(),
                },
            }
        }
    }
}

async fn close_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        debug!("Error while closing connection: {}", e);
    }
}

/// Send a keep-alive every `interval` until the link is gone.
///
/// Holds only a weak handle to the outbound queue, so it stops on its own
/// once the link drops the queue or the connection task exits.
async fn keepalive(
    outbound: mpsc::WeakUnboundedSender<Message>,
    interval: Duration,
    generation: u64,
) {
    let interval = interval.max(MIN_KEEPALIVE_INTERVAL);
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(outbound) = outbound.upgrade() else {
            break;
        };
        if outbound.send(Message::ping()).is_err() {
            break;
        }
        trace!(generation, "Keepalive sent");
    }

    debug!(generation, "Keepalive stopped");
}
