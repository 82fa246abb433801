//! Connection handlers for the relay.
//!
//! This module handles the connection lifecycle: the room request that must
//! open every connection, then relaying playback states between the members
//! of a room.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::rooms::{Membership, Rooms};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use watch_protocol::{codec, Message as WireMessage};

/// Ping intervals below this are raised to it.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Shared relay state.
pub struct AppState {
    /// All rooms.
    pub rooms: Rooms,
    /// Relay configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Rooms::new(config.limits.max_rooms, config.limits.send_queue),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind to the configured address and run the relay.
///
/// # Errors
///
/// Returns an error if the relay fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    serve(listener, config).await
}

/// Run the relay on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config));
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.rooms.room_count()
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !state.config.origin_allowed(origin) {
        warn!(origin = ?origin, "Rejected connection from origin");
        metrics::record_error("origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::open();
    let (mut sender, mut receiver) = socket.split();

    let Some(mut membership) = handshake(&mut sender, &mut receiver, &state).await else {
        let _ = sender.send(Message::Close(None)).await;
        return;
    };
    metrics::set_active_rooms(state.rooms.room_count());

    let reason = relay(&mut sender, &mut receiver, &mut membership, &state).await;
    let _ = sender.send(Message::Close(None)).await;

    state.rooms.leave(&membership.room, membership.member);
    metrics::set_active_rooms(state.rooms.room_count());

    info!(room = %membership.room, member = ?membership.member, reason, "Member disconnected");
}

/// What the first frame of a connection turned out to be.
enum Inbound {
    Message(WireMessage),
    Invalid,
    Closed,
}

/// Wait for the room request and answer it.
///
/// Returns the membership if the connection joined a room.
async fn handshake(
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
    state: &AppState,
) -> Option<Membership> {
    let started = Instant::now();
    let timeout = state.config.heartbeat.handshake_timeout();

    let first = match tokio::time::timeout(timeout, first_message(receiver)).await {
        Ok(first) => first,
        Err(_) => {
            warn!("Room request timed out");
            metrics::record_handshake("timeout", started.elapsed().as_secs_f64());
            return None;
        }
    };

    let (response, membership) = match first {
        Inbound::Closed => {
            debug!("Connection closed before room request");
            return None;
        }
        Inbound::Message(WireMessage::CreateRoom { .. }) => match state.rooms.create() {
            Ok(membership) => (
                WireMessage::room_created(membership.room.clone()),
                Some(membership),
            ),
            Err(e) => (WireMessage::room_error(e.to_string()), None),
        },
        Inbound::Message(WireMessage::JoinRoom { room_id, .. }) if room_id.is_empty() => {
            warn!("Missing room ID in join request");
            (WireMessage::room_error("Missing room ID"), None)
        }
        Inbound::Message(WireMessage::JoinRoom { room_id, .. }) => {
            match state.rooms.join(&room_id) {
                Ok(membership) => (
                    WireMessage::room_joined(membership.room.clone()),
                    Some(membership),
                ),
                Err(e) => {
                    debug!(room = %room_id, error = %e, "Join failed");
                    (WireMessage::room_error(e.to_string()), None)
                }
            }
        }
        Inbound::Message(other) => {
            warn!(kind = other.kind(), "Invalid room request type");
            (WireMessage::room_error("Invalid message type"), None)
        }
        Inbound::Invalid => (WireMessage::room_error("Invalid message type"), None),
    };

    let outcome = match (&response, &membership) {
        (WireMessage::RoomCreated { .. }, _) => "created",
        (_, Some(_)) => "joined",
        _ => "rejected",
    };
    metrics::record_handshake(outcome, started.elapsed().as_secs_f64());

    if let Err(e) = send_message(sender, &response).await {
        warn!(error = %e, "Failed to send room response");
        if let Some(membership) = &membership {
            state.rooms.leave(&membership.room, membership.member);
        }
        return None;
    }

    if let Some(membership) = &membership {
        info!(room = %membership.room, outcome, "Room request completed");
    }
    membership
}

/// Read until the first data frame.
async fn first_message(receiver: &mut WsReceiver) -> Inbound {
    while let Some(frame) = receiver.next().await {
        let decoded = match frame {
            Ok(Message::Text(text)) => codec::decode(&text),
            Ok(Message::Binary(data)) => codec::decode_bytes(&data),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return Inbound::Closed,
            Err(e) => {
                debug!(error = %e, "WebSocket error before room request");
                return Inbound::Closed;
            }
        };

        return match decoded {
            Ok(message) => Inbound::Message(message),
            Err(e) => {
                warn!(error = %e, "Undecodable room request");
                Inbound::Invalid
            }
        };
    }

    Inbound::Closed
}

/// Relay frames between the member and its room until the connection ends.
///
/// Returns why it ended.
async fn relay(
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
    membership: &mut Membership,
    state: &AppState,
) -> &'static str {
    let heartbeat = &state.config.heartbeat;
    let ping_interval = heartbeat.ping_interval().max(MIN_PING_INTERVAL);
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline = Instant::now() + heartbeat.pong_timeout();

    loop {
        tokio::select! {
            biased;

            outbound = membership.outbound.recv() => match outbound {
                Some(frame) => {
                    metrics::record_message(frame.len(), "outbound");
                    if sender.send(Message::Text(frame.to_string())).await.is_err() {
                        return "send failed";
                    }
                }
                None => return "dropped from room",
            },

            inbound = receiver.next() => {
                deadline = Instant::now() + heartbeat.pong_timeout();
                match inbound {
                    Some(Ok(Message::Text(text))) => handle_text(&text, membership, state),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(text, membership, state),
                        Err(_) => metrics::record_error("decode"),
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return "closed by client",
                    Some(Err(e)) => {
                        warn!(room = %membership.room, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        return "websocket error";
                    }
                }
            }

            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    return "ping failed";
                }
            }

            _ = sleep_until(deadline) => {
                metrics::record_error("timeout");
                return "heartbeat timeout";
            }
        }
    }
}

/// Handle a frame from a room member.
fn handle_text(text: &str, membership: &Membership, state: &AppState) {
    metrics::record_message(text.len(), "inbound");

    let message = match codec::decode(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(room = %membership.room, error = %e, "Undecodable message");
            metrics::record_error("decode");
            return;
        }
    };

    match message {
        WireMessage::VideoStateChange { .. } => match codec::encode(&message) {
            Ok(frame) => {
                let frame: Arc<str> = Arc::from(frame);
                let recipients = state
                    .rooms
                    .broadcast(&membership.room, membership.member, &frame);
                trace!(room = %membership.room, recipients, "State relayed");
            }
            Err(e) => {
                error!(error = %e, "Failed to encode state");
                metrics::record_error("encode");
            }
        },
        WireMessage::PingKeepalive => {}
        other => {
            warn!(room = %membership.room, kind = other.kind(), "Unhandled message type");
        }
    }
}

/// Send a protocol message to the WebSocket.
async fn send_message(sender: &mut WsSender, message: &WireMessage) -> Result<()> {
    let text = codec::encode(message)?;
    metrics::record_message(text.len(), "outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}
