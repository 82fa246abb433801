//! Two viewers kept in sync through a real relay.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use watch_core::config::{DiscoveryConfig, SyncConfig};
use watch_core::{Client, ClientConfig, ClientHandle, Notice, RoomStore, SimulatedPlayer};
use watch_relay::{serve, Config};
use watch_transport::WebSocketConnector;

struct Viewer {
    player: SimulatedPlayer,
    handle: ClientHandle,
    notices: mpsc::UnboundedReceiver<Notice>,
}

async fn start_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config {
        allowed_origins: Vec::new(),
        ..Config::default()
    };
    tokio::spawn(serve(listener, config));
    format!("ws://{addr}/ws")
}

fn start_viewer(relay_url: &str) -> Viewer {
    let config = ClientConfig {
        relay_url: relay_url.to_string(),
        sync: SyncConfig {
            initial_sync_delay_ms: 50,
            ad_finish_debounce_ms: 100,
            ..SyncConfig::default()
        },
        discovery: DiscoveryConfig {
            poll_interval_ms: 20,
            ad_poll_interval_ms: 20,
            ..DiscoveryConfig::default()
        },
        ..ClientConfig::default()
    };

    let player = SimulatedPlayer::new();
    let events = player.subscribe();
    let (client, handle, notices) = Client::new(
        &config,
        Arc::new(WebSocketConnector::new()),
        player.clone(),
        events,
        RoomStore::default(),
    );
    tokio::spawn(client.run());

    Viewer {
        player,
        handle,
        notices,
    }
}

async fn wait_for_notice(viewer: &mut Viewer, wanted: impl Fn(&Notice) -> bool) {
    let wait = async {
        loop {
            let notice = viewer.notices.recv().await.expect("client stopped");
            if wanted(&notice) {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for notice");
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting until {what}");
}

fn at(player: &SimulatedPlayer, position: f64, paused: bool) -> bool {
    (player.position() - position).abs() < f64::EPSILON && player.is_paused() == paused
}

#[tokio::test]
async fn test_two_viewers_follow_each_other() {
    let relay_url = start_relay().await;
    let mut host = start_viewer(&relay_url);
    let mut guest = start_viewer(&relay_url);

    let room = host.handle.create_room().await.unwrap();
    assert_eq!(guest.handle.join_room(room.clone()).await, Ok(room.clone()));
    assert_eq!(guest.handle.room_store().get(), Some(room));

    wait_for_notice(&mut host, |n| matches!(n, Notice::RoomStatus(_))).await;
    wait_for_notice(&mut guest, |n| matches!(n, Notice::RoomStatus(_))).await;
    // Let the initial syncs settle.
    tokio::time::sleep(Duration::from_millis(300)).await;

    host.player.user_seek(100.0);
    host.player.user_play();
    eventually("guest plays at 100s", || at(&guest.player, 100.0, false)).await;

    // Nothing was echoed back to the host.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(at(&host.player, 100.0, false));

    guest.player.user_pause();
    eventually("host pauses", || host.player.is_paused()).await;
    assert!((host.player.position() - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_ad_on_one_viewer_pauses_and_resumes_the_other() {
    let relay_url = start_relay().await;
    let mut host = start_viewer(&relay_url);
    let mut guest = start_viewer(&relay_url);

    let room = host.handle.create_room().await.unwrap();
    guest.handle.join_room(room).await.unwrap();
    wait_for_notice(&mut host, |n| matches!(n, Notice::RoomStatus(_))).await;
    wait_for_notice(&mut guest, |n| matches!(n, Notice::RoomStatus(_))).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    host.player.user_seek(50.0);
    host.player.user_play();
    eventually("guest plays at 50s", || at(&guest.player, 50.0, false)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    guest.player.set_ad_showing(true);
    wait_for_notice(&mut guest, |n| *n == Notice::AdStarted).await;
    eventually("host pauses for the ad", || host.player.is_paused()).await;
    // The sentinel never moves the host.
    assert!((host.player.position() - 50.0).abs() < f64::EPSILON);

    guest.player.set_ad_showing(false);
    wait_for_notice(&mut guest, |n| *n == Notice::AdFinished).await;
    eventually("host resumes after the ad", || at(&host.player, 50.0, false)).await;
}
