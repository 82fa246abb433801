//! Session manager.
//!
//! A [`Session`] wraps the client's single [`RelayLink`]. It correlates room
//! requests with the relay's replies, tags outbound states with the active
//! room and hands remote states to the focused consumer.
//!
//! At most one room request is outstanding. A new request supersedes the
//! previous one, which resolves with [`SessionError::Superseded`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use watch_protocol::{Message, RoomId, VideoState};
use watch_transport::{ConnectionState, Connector, LinkConfig, LinkEvent, RelayLink};

/// Why a room request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The link closed or could not be established.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// The relay refused the request.
    #[error("Room rejected: {0}")]
    RoomRejected(String),

    /// A newer request took this one's place.
    #[error("Superseded by a newer room request")]
    Superseded,

    /// The session was disposed.
    #[error("Session disposed")]
    Disposed,
}

/// Outcome of a room request.
pub type RoomResult = Result<RoomId, SessionError>;

/// Kind of room request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRequestKind {
    /// Ask the relay for a new room.
    Create,
    /// Join an existing room.
    Join,
}

/// Resolves once the relay answers the room request, or the request fails.
#[derive(Debug)]
#[must_use = "a room request does nothing unless awaited"]
pub struct RoomRequest {
    reply: oneshot::Receiver<RoomResult>,
}

impl Future for RoomRequest {
    type Output = RoomResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply)
            .poll(cx)
            .map(|reply| reply.unwrap_or(Err(SessionError::Disposed)))
    }
}

/// Identifies a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

/// A state from the room, delivered to the focused consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUpdate {
    /// Room the state was sent to.
    pub room: RoomId,
    /// The state.
    pub state: VideoState,
}

/// Session-level outcome of a link event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The relay created or confirmed a room.
    RoomAssigned(RoomId),
    /// The relay refused the room request.
    RoomRejected(String),
    /// The link went away.
    Disconnected {
        /// Why.
        reason: String,
    },
}

struct PendingRequest {
    kind: RoomRequestKind,
    reply: oneshot::Sender<RoomResult>,
}

impl PendingRequest {
    fn resolve(self, result: RoomResult) {
        trace!(kind = ?self.kind, ok = result.is_ok(), "Resolving room request");
        // The requester may have stopped waiting.
        let _ = self.reply.send(result);
    }
}

/// One client's session with the relay.
pub struct Session {
    link: RelayLink,
    pending: Option<PendingRequest>,
    /// Whether the relay confirmed the link's room.
    confirmed: bool,
    consumers: HashMap<ConsumerId, mpsc::UnboundedSender<RemoteUpdate>>,
    focused: Option<ConsumerId>,
    next_consumer: u64,
    disposed: bool,
}

impl Session {
    /// Create a session with a disconnected link.
    ///
    /// The returned receiver yields the link's events, which must be fed
    /// back through [`Session::handle_link_event`].
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            link: RelayLink::new(connector, config, events_tx),
            pending: None,
            confirmed: false,
            consumers: HashMap::new(),
            focused: None,
            next_consumer: 0,
            disposed: false,
        };
        (session, events_rx)
    }

    /// Ask the relay for a new room.
    ///
    /// Only one request is pending at a time: a request still waiting for
    /// the relay resolves with [`SessionError::Superseded`] once a newer
    /// one is made.
    pub fn request_create_room(&mut self) -> RoomRequest {
        self.request(RoomRequestKind::Create, None)
    }

    /// Join the room `room`.
    ///
    /// Supersedes any pending request like [`Session::request_create_room`].
    /// Joining the room the session is already confirmed in resolves at once.
    pub fn request_join_room(&mut self, room: RoomId) -> RoomRequest {
        self.request(RoomRequestKind::Join, Some(room))
    }

    fn request(&mut self, kind: RoomRequestKind, room: Option<RoomId>) -> RoomRequest {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = RoomRequest { reply: reply_rx };

        if self.disposed {
            let _ = reply_tx.send(Err(SessionError::Disposed));
            return request;
        }

        if let Some(previous) = self.pending.take() {
            debug!(previous = ?previous.kind, next = ?kind, "Room request superseded");
            previous.resolve(Err(SessionError::Superseded));
        }

        info!(kind = ?kind, room = ?room, "Room request");
        let pending = PendingRequest {
            kind,
            reply: reply_tx,
        };

        if self.link.open(room.clone(), kind == RoomRequestKind::Create) {
            self.confirmed = false;
            self.pending = Some(pending);
        } else {
            match room {
                // Already in this room: the relay will not answer again.
                Some(room) if self.confirmed => pending.resolve(Ok(room)),
                _ => self.pending = Some(pending),
            }
        }

        request
    }

    /// Send a local state to the active room.
    ///
    /// Does nothing without an active room or a connected link. Returns
    /// `true` if the state was handed to the link.
    pub fn broadcast_state(&self, state: VideoState) -> bool {
        let Some(room) = self.active_room() else {
            trace!("No active room, not broadcasting");
            return false;
        };
        if !self.link.is_connected() {
            trace!("Link not connected, not broadcasting");
            return false;
        }

        debug!(room = %room, state = %state, "Broadcasting state");
        self.link.send(Message::video_state(room.clone(), state))
    }

    /// Apply an event from the link.
    pub fn handle_link_event(&mut self, event: LinkEvent) -> Option<SessionEvent> {
        match self.link.accept_event(event)? {
            LinkEvent::Opened { generation } => {
                debug!(generation, "Room request sent");
                None
            }
            LinkEvent::Message { message, .. } => self.handle_message(message),
            LinkEvent::Closed { reason, .. } => {
                self.confirmed = false;
                if let Some(pending) = self.pending.take() {
                    pending.resolve(Err(SessionError::ConnectionFailure(reason.clone())));
                }
                Some(SessionEvent::Disconnected { reason })
            }
        }
    }

    fn handle_message(&mut self, message: Message) -> Option<SessionEvent> {
        match message {
            Message::RoomCreated { room_id } | Message::RoomJoined { room_id } => {
                info!(room = %room_id, "Room assigned");
                self.link.set_room(room_id.clone());
                self.confirmed = true;
                if let Some(pending) = self.pending.take() {
                    pending.resolve(Ok(room_id.clone()));
                }
                Some(SessionEvent::RoomAssigned(room_id))
            }
            Message::RoomError { error } => {
                warn!(error = %error, "Room request rejected");
                if let Some(pending) = self.pending.take() {
                    pending.resolve(Err(SessionError::RoomRejected(error.clone())));
                }
                Some(SessionEvent::RoomRejected(error))
            }
            Message::VideoStateChange { room_id, data } => {
                if self.active_room() != Some(&room_id) {
                    trace!(room = %room_id, "State for another room");
                    return None;
                }
                self.deliver(RemoteUpdate {
                    room: room_id,
                    state: data,
                });
                None
            }
            other => {
                trace!(kind = other.kind(), "Ignoring message");
                None
            }
        }
    }

    fn deliver(&mut self, update: RemoteUpdate) {
        let Some(id) = self.focused else {
            trace!("No focused consumer, dropping remote state");
            return;
        };
        let delivered = self
            .consumers
            .get(&id)
            .is_some_and(|consumer| consumer.send(update).is_ok());

        if !delivered {
            debug!(consumer = ?id, "Focused consumer is gone");
            self.unregister_consumer(id);
        }
    }

    /// Register a consumer of remote states. It receives nothing until focused.
    pub fn register_consumer(&mut self) -> (ConsumerId, mpsc::UnboundedReceiver<RemoteUpdate>) {
        let id = ConsumerId(self.next_consumer);
        self.next_consumer += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers.insert(id, tx);
        debug!(consumer = ?id, "Consumer registered");
        (id, rx)
    }

    /// Give focus to `id`, or to nobody. Returns `false` for unknown consumers.
    pub fn focus(&mut self, id: Option<ConsumerId>) -> bool {
        match id {
            Some(id) if !self.consumers.contains_key(&id) => false,
            _ => {
                self.focused = id;
                true
            }
        }
    }

    /// Remove a consumer.
    pub fn unregister_consumer(&mut self, id: ConsumerId) {
        self.consumers.remove(&id);
        if self.focused == Some(id) {
            self.focused = None;
        }
    }

    /// Room of the current link.
    #[must_use]
    pub fn active_room(&self) -> Option<&RoomId> {
        self.link.room()
    }

    /// State of the link.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Whether a room request is outstanding.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Close the link, fail the pending request and drop all consumers.
    ///
    /// Requests made afterwards fail with [`SessionError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        info!("Disposing session");
        self.disposed = true;
        self.link.close();
        if let Some(pending) = self.pending.take() {
            pending.resolve(Err(SessionError::Disposed));
        }
        self.consumers.clear();
        self.focused = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watch_transport::memory::{self, MemoryPeer, MemoryRelay};

    fn session_with_relay() -> (Session, MemoryRelay, mpsc::UnboundedReceiver<LinkEvent>) {
        let (connector, relay) = memory::pair();
        let config = LinkConfig {
            url: "memory://relay".to_string(),
            ..Default::default()
        };
        let (session, events) = Session::new(Arc::new(connector), config);
        (session, relay, events)
    }

    async fn pump(
        session: &mut Session,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Option<SessionEvent> {
        let event = events.recv().await.unwrap();
        session.handle_link_event(event)
    }

    /// Open a joined session for `room` and return the relay's end.
    async fn joined(
        session: &mut Session,
        relay: &mut MemoryRelay,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
        room: &str,
    ) -> MemoryPeer {
        let request = session.request_join_room(RoomId::new(room));
        let mut peer = relay.accept().await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::join_room(room)));
        pump(session, events).await;

        peer.send(&Message::room_joined(room));
        assert_eq!(
            pump(session, events).await,
            Some(SessionEvent::RoomAssigned(RoomId::new(room)))
        );
        assert_eq!(request.await, Ok(RoomId::new(room)));
        peer
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_room_resolves_with_relay_id() {
        let (mut session, mut relay, mut events) = session_with_relay();

        let request = session.request_create_room();
        assert!(session.has_pending());
        assert_eq!(session.connection_state(), ConnectionState::Connecting);

        let mut peer = relay.accept().await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::create_room()));
        assert_eq!(pump(&mut session, &mut events).await, None);

        peer.send(&Message::room_created("abc123"));
        assert_eq!(
            pump(&mut session, &mut events).await,
            Some(SessionEvent::RoomAssigned(RoomId::new("abc123")))
        );

        assert_eq!(request.await, Ok(RoomId::new("abc123")));
        assert_eq!(session.active_room(), Some(&RoomId::new("abc123")));
        assert!(!session.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_error_rejects_request() {
        let (mut session, mut relay, mut events) = session_with_relay();

        let request = session.request_join_room(RoomId::new("missing"));
        let peer = relay.accept().await.unwrap();
        pump(&mut session, &mut events).await;

        peer.send(&Message::room_error("Room not found"));
        assert_eq!(
            pump(&mut session, &mut events).await,
            Some(SessionEvent::RoomRejected("Room not found".to_string()))
        );
        assert_eq!(
            request.await,
            Err(SessionError::RoomRejected("Room not found".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_pending_join_fails_request() {
        let (mut session, mut relay, mut events) = session_with_relay();

        let request = session.request_join_room(RoomId::new("r1"));
        let mut peer = relay.accept().await.unwrap();
        pump(&mut session, &mut events).await;

        peer.close();
        drop(peer);

        let event = pump(&mut session, &mut events).await;
        assert!(matches!(event, Some(SessionEvent::Disconnected { .. })));
        assert!(matches!(
            request.await,
            Err(SessionError::ConnectionFailure(_))
        ));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(session.active_room().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_fails_request() {
        let (mut session, relay, mut events) = session_with_relay();
        relay.set_refusing(true);

        let request = session.request_create_room();
        pump(&mut session, &mut events).await;

        match request.await {
            Err(SessionError::ConnectionFailure(reason)) => assert!(reason.contains("refused")),
            other => panic!("Expected connection failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_supersedes_pending_one() {
        let (mut session, mut relay, mut events) = session_with_relay();

        let first = session.request_create_room();
        let _first_peer = relay.accept().await.unwrap();
        let second = session.request_join_room(RoomId::new("r2"));

        assert_eq!(first.await, Err(SessionError::Superseded));

        let mut peer = relay.accept().await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::join_room("r2")));

        // Events of the first connection are discarded.
        loop {
            if pump(&mut session, &mut events).await.is_none()
                && session.connection_state() == ConnectionState::Connected
            {
                break;
            }
        }

        peer.send(&Message::room_joined("r2"));
        loop {
            if let Some(event) = pump(&mut session, &mut events).await {
                assert_eq!(event, SessionEvent::RoomAssigned(RoomId::new("r2")));
                break;
            }
        }
        assert_eq!(second.await, Ok(RoomId::new("r2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_supersedes_pending_join() {
        let (mut session, mut relay, mut events) = session_with_relay();

        let join = session.request_join_room(RoomId::new("r1"));
        let mut first_peer = relay.accept().await.unwrap();
        assert_eq!(first_peer.recv().await, Some(Message::join_room("r1")));

        let create = session.request_create_room();
        assert_eq!(join.await, Err(SessionError::Superseded));
        assert!(session.has_pending());

        let mut peer = relay.accept().await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::create_room()));
        loop {
            if pump(&mut session, &mut events).await.is_none()
                && session.connection_state() == ConnectionState::Connected
            {
                break;
            }
        }

        // A late answer on the replaced connection is not seen.
        first_peer.send(&Message::room_joined("r1"));
        peer.send(&Message::room_created("r9"));
        loop {
            if let Some(event) = pump(&mut session, &mut events).await {
                assert_eq!(event, SessionEvent::RoomAssigned(RoomId::new("r9")));
                break;
            }
        }
        assert_eq!(create.await, Ok(RoomId::new("r9")));
        assert_eq!(session.active_room(), Some(&RoomId::new("r9")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_same_room_while_connected_resolves_immediately() {
        let (mut session, mut relay, mut events) = session_with_relay();
        let _peer = joined(&mut session, &mut relay, &mut events, "r1").await;

        let again = session.request_join_room(RoomId::new("r1"));
        assert!(!session.has_pending());
        assert_eq!(again.await, Ok(RoomId::new("r1")));
        assert!(relay.try_accept().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_tags_active_room() {
        let (mut session, mut relay, mut events) = session_with_relay();
        assert!(!session.broadcast_state(VideoState::new(1.0, false)));

        let mut peer = joined(&mut session, &mut relay, &mut events, "r1").await;

        assert!(session.broadcast_state(VideoState::new(12.5, false)));
        assert_eq!(
            peer.recv_skipping_keepalive().await,
            Some(Message::video_state("r1", VideoState::new(12.5, false)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_state_goes_to_focused_consumer_only() {
        let (mut session, mut relay, mut events) = session_with_relay();
        let peer = joined(&mut session, &mut relay, &mut events, "r1").await;

        let (first, mut first_rx) = session.register_consumer();
        let (_second, mut second_rx) = session.register_consumer();

        // Nobody focused yet.
        peer.send(&Message::video_state("r1", VideoState::new(5.0, true)));
        pump(&mut session, &mut events).await;
        assert!(first_rx.try_recv().is_err());

        assert!(session.focus(Some(first)));
        let state = VideoState::new(7.0, false);
        peer.send(&Message::video_state("r1", state));
        pump(&mut session, &mut events).await;

        assert_eq!(
            first_rx.try_recv(),
            Ok(RemoteUpdate {
                room: RoomId::new("r1"),
                state
            })
        );
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_state_for_other_room_is_dropped() {
        let (mut session, mut relay, mut events) = session_with_relay();
        let peer = joined(&mut session, &mut relay, &mut events, "r1").await;
        let (id, mut rx) = session.register_consumer();
        session.focus(Some(id));

        peer.send(&Message::video_state("r9", VideoState::new(5.0, true)));
        pump(&mut session, &mut events).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_focus_unknown_consumer() {
        let (mut session, _relay, _events) = session_with_relay();
        let (id, rx) = session.register_consumer();

        assert!(session.focus(Some(id)));
        session.unregister_consumer(id);
        assert!(!session.focus(Some(id)));
        assert!(session.focus(None));
        drop(rx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_fails_pending_and_later_requests() {
        let (mut session, mut relay, _events) = session_with_relay();

        let request = session.request_create_room();
        let _peer = relay.accept().await.unwrap();
        session.dispose();

        assert_eq!(request.await, Err(SessionError::Disposed));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(
            session.request_create_room().await,
            Err(SessionError::Disposed)
        );
    }
}
