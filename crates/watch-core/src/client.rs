//! The client event loop.
//!
//! [`Client::run`] is the single task that owns a viewer's [`Session`] and
//! [`Engine`]. Room commands, link events, remote states, player events,
//! room store changes and timers are handled one at a time, so the engine's
//! flags need no further synchronization.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use watch_protocol::RoomId;
use watch_transport::{Connector, LinkEvent};

use crate::config::ClientConfig;
use crate::engine::{Engine, EngineAction};
use crate::notice::Notice;
use crate::probe::{PlaybackEvent, PlayerProbe};
use crate::session::{
    ConsumerId, RemoteUpdate, RoomRequest, RoomResult, Session, SessionError, SessionEvent,
};
use crate::store::RoomStore;

/// Requests sent to a running client.
#[derive(Debug)]
pub enum ClientCommand {
    /// Create a room. The request is handed back for the caller to await.
    CreateRoom {
        /// Receives the pending request.
        reply: oneshot::Sender<RoomRequest>,
    },
    /// Join a room.
    JoinRoom {
        /// Room to join.
        room: RoomId,
        /// Receives the pending request.
        reply: oneshot::Sender<RoomRequest>,
    },
    /// Whether this client's view is the focused one.
    SetFocus(bool),
    /// Stop the client and close the link.
    Shutdown,
}

/// Handle for talking to a running [`Client`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    store: RoomStore,
}

impl ClientHandle {
    /// Ask the relay for a new room.
    pub async fn create_room(&self) -> RoomResult {
        let (reply, request) = oneshot::channel();
        self.request(ClientCommand::CreateRoom { reply }, request).await
    }

    /// Join `room`.
    pub async fn join_room(&self, room: RoomId) -> RoomResult {
        let (reply, request) = oneshot::channel();
        self.request(ClientCommand::JoinRoom { room, reply }, request)
            .await
    }

    async fn request(
        &self,
        command: ClientCommand,
        request: oneshot::Receiver<RoomRequest>,
    ) -> RoomResult {
        if self.commands.send(command).is_err() {
            return Err(SessionError::Disposed);
        }
        match request.await {
            Ok(request) => request.await,
            Err(_) => Err(SessionError::Disposed),
        }
    }

    /// Mark this client's view as focused or not. Only a focused client
    /// applies remote states.
    pub fn set_focus(&self, focused: bool) -> bool {
        self.commands.send(ClientCommand::SetFocus(focused)).is_ok()
    }

    /// Stop the client.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ClientCommand::Shutdown);
    }

    /// The store holding the active room.
    pub fn room_store(&self) -> &RoomStore {
        &self.store
    }
}

/// A watch-together client.
pub struct Client<P: PlayerProbe> {
    session: Session,
    engine: Engine<P>,
    consumer: ConsumerId,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    remote: mpsc::UnboundedReceiver<RemoteUpdate>,
    player_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    store: RoomStore,
    store_changes: watch::Receiver<Option<RoomId>>,
    notices: mpsc::UnboundedSender<Notice>,
    discovery_interval: Duration,
    ad_poll_interval: Duration,
    max_attempts: u32,
    attempts: u32,
    gave_up: bool,
}

impl<P: PlayerProbe> Client<P> {
    /// Create a client.
    ///
    /// `player_events` carries the local video's play, pause and seek
    /// events. The room is read from `store` now and followed afterwards.
    /// Notices for the viewer arrive on the returned receiver.
    pub fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        probe: P,
        player_events: mpsc::UnboundedReceiver<PlaybackEvent>,
        store: RoomStore,
    ) -> (Self, ClientHandle, mpsc::UnboundedReceiver<Notice>) {
        let (mut session, link_events) = Session::new(connector, config.link_config());
        let (consumer, remote) = session.register_consumer();
        session.focus(Some(consumer));

        let mut engine = Engine::new(probe, config.engine_config());
        engine.restore_room(store.get());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let client = Self {
            session,
            engine,
            consumer,
            commands: commands_rx,
            link_events,
            remote,
            player_events,
            store_changes: store.subscribe(),
            store: store.clone(),
            notices: notices_tx,
            discovery_interval: config.discovery_interval(),
            ad_poll_interval: config.ad_poll_interval(),
            max_attempts: config.discovery.max_attempts,
            attempts: 0,
            gave_up: false,
        };
        let handle = ClientHandle {
            commands: commands_tx,
            store,
        };

        (client, handle, notices_rx)
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!(room = ?self.engine.room(), "Client started");

        let mut discovery = ticker(self.discovery_interval);
        let mut ad_poll = ticker(self.ad_poll_interval);

        loop {
            let deadline = self.engine.next_deadline();
            let idle = Instant::now() + Duration::from_secs(3600);

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                Ok(()) = self.store_changes.changed() => {
                    let room = self.store_changes.borrow_and_update().clone();
                    let actions = self.engine.set_room(room, Instant::now());
                    self.dispatch(actions);
                }

                Some(event) = self.link_events.recv() => self.handle_link_event(event),

                Some(update) = self.remote.recv() => {
                    let actions = self.engine.on_remote_state(&update.room, update.state, Instant::now());
                    self.dispatch(actions);
                }

                Some(event) = self.player_events.recv() => {
                    let actions = self.engine.on_local_event(event, Instant::now());
                    self.dispatch(actions);
                }

                _ = sleep_until(deadline.unwrap_or(idle)), if deadline.is_some() => {
                    let actions = self.engine.poll_timers(Instant::now());
                    self.dispatch(actions);
                }

                _ = discovery.tick(), if !self.engine.is_attached() && !self.gave_up => {
                    self.discover();
                }

                _ = ad_poll.tick(), if self.engine.is_attached() => {
                    let actions = self.engine.poll_ad(Instant::now());
                    self.dispatch(actions);
                }
            }
        }

        self.session.dispose();
        info!("Client stopped");
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::CreateRoom { reply } => {
                let _ = reply.send(self.session.request_create_room());
            }
            ClientCommand::JoinRoom { room, reply } => {
                let _ = reply.send(self.session.request_join_room(room));
            }
            ClientCommand::SetFocus(focused) => {
                debug!(focused, "Focus changed");
                self.session.focus(focused.then_some(self.consumer));
            }
            ClientCommand::Shutdown => {}
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match self.session.handle_link_event(event) {
            Some(SessionEvent::RoomAssigned(room)) => {
                self.store.set(Some(room.clone()));
                // Apply now so states that follow in the same batch match.
                self.store_changes.borrow_and_update();
                let actions = self.engine.set_room(Some(room), Instant::now());
                self.dispatch(actions);
            }
            Some(SessionEvent::RoomRejected(error)) => {
                warn!(error = %error, "Relay rejected room request");
            }
            Some(SessionEvent::Disconnected { reason }) => {
                info!(reason = %reason, "Disconnected from relay");
            }
            None => {}
        }
    }

    fn discover(&mut self) {
        self.attempts += 1;
        let actions = self.engine.try_attach(Instant::now());
        self.dispatch(actions);

        if self.engine.is_attached() {
            debug!(attempts = self.attempts, "Player found");
        } else if self.attempts >= self.max_attempts {
            self.gave_up = true;
            warn!(attempts = self.attempts, "Giving up on finding the player");
            self.notify(Notice::PlayerUnavailable {
                attempts: self.attempts,
            });
        }
    }

    fn dispatch(&mut self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Broadcast(state) => {
                    self.session.broadcast_state(state);
                }
                EngineAction::Notify(notice) => self.notify(notice),
            }
        }
    }

    fn notify(&self, notice: Notice) {
        info!(notice = %notice, "Notice");
        let _ = self.notices.send(notice);
    }
}

/// Shortest period a ticker runs at; `interval_at` rejects zero.
const MIN_TICK: Duration = Duration::from_millis(1);

fn ticker(period: Duration) -> Interval {
    let period = period.max(MIN_TICK);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
