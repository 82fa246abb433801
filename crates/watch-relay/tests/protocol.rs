//! Relay protocol over real sockets.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use watch_protocol::{codec, Message, RoomId, VideoState};
use watch_relay::{serve, Config};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    Config {
        allowed_origins: Vec::new(),
        ..Config::default()
    }
}

async fn start_relay(config: Config) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, config));
    addr
}

async fn connect(addr: std::net::SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, message: &Message) {
    let text = codec::encode(message).unwrap();
    socket.send(WsMessage::Text(text)).await.unwrap();
}

/// Next protocol message, or `None` once the relay closed the connection.
async fn recv(socket: &mut Socket) -> Option<Message> {
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => return Some(codec::decode(&text).unwrap()),
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue,
                _ => return None,
            }
        }
        None
    });
    next.await.expect("timed out waiting for the relay")
}

async fn create_room(addr: std::net::SocketAddr) -> (Socket, RoomId) {
    let mut socket = connect(addr).await;
    send(&mut socket, &Message::create_room()).await;
    match recv(&mut socket).await {
        Some(Message::RoomCreated { room_id }) => (socket, room_id),
        other => panic!("Expected ROOM_CREATED, got {:?}", other),
    }
}

async fn join_room(addr: std::net::SocketAddr, room: &RoomId) -> (Socket, Option<Message>) {
    let mut socket = connect(addr).await;
    send(&mut socket, &Message::join_room(room.clone())).await;
    let reply = recv(&mut socket).await;
    (socket, reply)
}

#[tokio::test]
async fn test_state_is_relayed_to_other_members_only() {
    let addr = start_relay(test_config()).await;
    let (mut host, room) = create_room(addr).await;

    let (mut guest, reply) = join_room(addr, &room).await;
    assert_eq!(reply, Some(Message::room_joined(room.clone())));

    let state = Message::video_state(room.clone(), VideoState::new(42.0, false));
    send(&mut guest, &state).await;
    send(&mut guest, &Message::ping()).await;
    assert_eq!(recv(&mut host).await, Some(state));

    let echo = tokio::time::timeout(Duration::from_millis(200), guest.next()).await;
    assert!(echo.is_err(), "sender must not receive its own state");
}

#[tokio::test]
async fn test_join_unknown_room_is_rejected_and_closed() {
    let addr = start_relay(test_config()).await;

    let (mut socket, reply) = join_room(addr, &RoomId::new("unknown")).await;
    assert_eq!(reply, Some(Message::room_error("Room not found")));
    assert_eq!(recv(&mut socket).await, None);
}

#[tokio::test]
async fn test_join_without_room_id_is_rejected() {
    let addr = start_relay(test_config()).await;

    let (_socket, reply) = join_room(addr, &RoomId::default()).await;
    assert_eq!(reply, Some(Message::room_error("Missing room ID")));
}

#[tokio::test]
async fn test_first_message_must_be_room_request() {
    let addr = start_relay(test_config()).await;
    let mut socket = connect(addr).await;

    send(
        &mut socket,
        &Message::video_state("r1", VideoState::new(1.0, true)),
    )
    .await;
    assert_eq!(
        recv(&mut socket).await,
        Some(Message::room_error("Invalid message type"))
    );
}

#[tokio::test]
async fn test_silent_connection_is_closed_after_handshake_timeout() {
    let mut config = test_config();
    config.heartbeat.handshake_timeout_ms = 100;
    let addr = start_relay(config).await;

    let mut socket = connect(addr).await;
    assert_eq!(recv(&mut socket).await, None);
}

#[tokio::test]
async fn test_silent_member_is_dropped_while_active_member_stays() {
    let mut config = test_config();
    config.heartbeat.pong_timeout_ms = 300;
    let addr = start_relay(config).await;

    let (mut host, room) = create_room(addr).await;
    let (mut silent, reply) = join_room(addr, &room).await;
    assert_eq!(reply, Some(Message::room_joined(room.clone())));

    for _ in 0..8 {
        send(&mut host, &Message::ping()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(recv(&mut silent).await, None);

    let (mut guest, reply) = join_room(addr, &room).await;
    assert_eq!(reply, Some(Message::room_joined(room.clone())));
    let state = Message::video_state(room.clone(), VideoState::new(7.0, true));
    send(&mut guest, &state).await;
    assert_eq!(recv(&mut host).await, Some(state));
}

#[tokio::test]
async fn test_zero_ping_interval_still_relays() {
    let mut config = test_config();
    config.heartbeat.ping_interval_ms = 0;
    let addr = start_relay(config).await;

    let (mut host, room) = create_room(addr).await;
    let (mut guest, reply) = join_room(addr, &room).await;
    assert_eq!(reply, Some(Message::room_joined(room.clone())));

    let state = Message::video_state(room.clone(), VideoState::new(3.0, false));
    send(&mut guest, &state).await;
    assert_eq!(recv(&mut host).await, Some(state));
}

#[tokio::test]
async fn test_room_is_deleted_when_last_member_leaves() {
    let addr = start_relay(test_config()).await;
    let (mut host, room) = create_room(addr).await;

    host.close(None).await.unwrap();
    drop(host);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let (_socket, reply) = join_room(addr, &room).await;
    assert_eq!(reply, Some(Message::room_error("Room not found")));
}

#[tokio::test]
async fn test_origin_allow_list() {
    let mut config = test_config();
    config.allowed_origins = vec!["http://allowed.example".to_string()];
    let addr = start_relay(config).await;
    let url = format!("ws://{addr}/ws");

    assert!(connect_async(url.as_str()).await.is_err());

    let mut request = url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://allowed.example"));
    assert!(connect_async(request).await.is_ok());
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_relay(test_config()).await;
    let (_host, _room) = create_room(addr).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"rooms\":1"));
}
