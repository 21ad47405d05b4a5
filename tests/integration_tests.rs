//! Integration tests for the coordination server and session proxies
//!
//! Each test runs a real server on an ephemeral port and talks to it through
//! one or more `client::network::Client`s, so framing, ordering and the
//! lifecycle rules are exercised end to end.

use client::network::{Client, ClientOptions, Listeners};
use server::config::{RoomMode, ServerConfig};
use server::network::ServerHandle;
use shared::{PlayerStatus, WireFormat};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(3);

fn server_config(rooms: RoomMode, wire_format: WireFormat) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        rooms,
        wire_format,
        final_score_duration_millis: 100,
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> ServerHandle {
    ServerHandle::spawn(config)
        .await
        .expect("Failed to start server")
}

fn options(server: &ServerHandle, wire_format: WireFormat) -> ClientOptions {
    ClientOptions {
        address: server.local_addr().to_string(),
        wire_format,
        ..ClientOptions::default()
    }
}

async fn join(server: &ServerHandle, wire_format: WireFormat) -> Client {
    let client = Client::connect(options(server, wire_format))
        .await
        .expect("Failed to connect");
    assert_ok!(client.registered(WAIT).await);
    client
}

/// Polls `check` until it holds or the wait runs out.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Drains a client's damage queue until `expected` strength has arrived.
async fn collect_damage(client: &Client, expected: u32) -> u32 {
    let mut total = 0;
    eventually(|| {
        total += client.take_damage();
        total >= expected
    })
    .await;
    total
}

/// REGISTRATION AND MEMBERSHIP TESTS
mod membership_tests {
    use super::*;

    /// Each client's `me` is the player the server created for it
    #[tokio::test]
    async fn first_player_added_is_self() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Binary)).await;

        let a = join(&server, WireFormat::Binary).await;
        let b = join(&server, WireFormat::Binary).await;
        let a_id = a.me().unwrap().id;
        let b_id = b.me().unwrap().id;
        assert_ne!(a_id, b_id);

        // B hears about itself first, then about A.
        assert_eq!(b.players().len(), 2);
        assert_eq!(b.other_players()[0].id, a_id);
        assert!(eventually(|| a.other_players().iter().any(|p| p.id == b_id)).await);

        assert_eq!(a.room_id(), b.room_id());
        assert!(!a.version_mismatch());

        server.stop().await.unwrap();
    }

    /// A full server rejects a newcomer by closing its connection
    #[tokio::test]
    async fn capacity_rejection_closes_connection() {
        let mut server = start_server(server_config(
            RoomMode::PublicRandomRooms {
                room_size: 2,
                max_rooms: 1,
            },
            WireFormat::Binary,
        ))
        .await;

        let a = join(&server, WireFormat::Binary).await;
        let _b = join(&server, WireFormat::Binary).await;

        let closed: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
        let closed_flag = Arc::clone(&closed);
        let c = Client::connect(options(&server, WireFormat::Binary))
            .await
            .unwrap();
        c.listen(Listeners::new().on_network_closed(move |graceful| {
            *closed_flag.lock().unwrap() = Some(graceful);
        }));

        assert!(eventually(|| closed.lock().unwrap().is_some()).await);
        assert_eq!(*closed.lock().unwrap(), Some(false));
        assert!(c.me().is_none());
        assert_eq!(a.players().len(), 2);

        server.stop().await.unwrap();
    }

    /// Private rooms are joined by sharing the creator's room id
    #[tokio::test]
    async fn private_room_by_id() {
        let mut server = start_server(server_config(
            RoomMode::MultiplePrivateRooms,
            WireFormat::Json,
        ))
        .await;

        let host = join(&server, WireFormat::Json).await;
        let room_id = host.room_id().unwrap();

        let guest = Client::connect(ClientOptions {
            room_id: Some(room_id),
            ..options(&server, WireFormat::Json)
        })
        .await
        .unwrap();
        assert_ok!(guest.registered(WAIT).await);
        assert_eq!(guest.room_id(), Some(room_id));

        // Someone without the id lands in a room of their own.
        let stranger = join(&server, WireFormat::Json).await;
        assert_ne!(stranger.room_id(), Some(room_id));
        assert!(stranger.other_players().is_empty());

        server.stop().await.unwrap();
    }
}

/// ROUND LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Two players in a room of two: scoring, attacks and departure
    #[tokio::test]
    async fn two_player_score_and_attack() {
        let mut server = start_server(server_config(
            RoomMode::PublicRandomRooms {
                room_size: 2,
                max_rooms: 1,
            },
            WireFormat::Binary,
        ))
        .await;

        let a = join(&server, WireFormat::Binary).await;
        let b = join(&server, WireFormat::Binary).await;
        let a_id = a.me().unwrap().id;
        let b_id = b.me().unwrap().id;
        assert!(eventually(|| a.players().len() == 2).await);

        assert_ok!(a.update_score(45_000));
        assert!(eventually(|| b.score_for(a_id) == 45_000).await);
        assert!(eventually(|| a.score_for(a_id) == 45_000).await);

        assert_eq!(collect_damage(&b, 1).await, 1);
        assert_eq!(a.take_damage(), 0);

        // No new breakpoint, so no new attack.
        assert_ok!(a.update_score(50_000));
        assert!(eventually(|| b.score_for(a_id) == 50_000).await);
        assert_eq!(b.take_damage(), 0);

        b.close();
        assert!(eventually(|| a.other_players().is_empty()).await);
        assert!(a.players().iter().all(|p| p.id != b_id));

        server.stop().await.unwrap();
    }

    /// Start, deaths and final scores
    #[tokio::test]
    async fn round_is_finalized_after_last_death() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Binary)).await;

        let a = join(&server, WireFormat::Binary).await;
        let b = join(&server, WireFormat::Binary).await;
        let a_id = a.me().unwrap().id;
        assert!(eventually(|| a.players().len() == 2).await);

        assert_ok!(a.start_game());
        assert!(eventually(|| b.poll_changes().start).await);
        assert!(eventually(|| a.players().iter().all(|p| p.is_playing())).await);

        assert_ok!(b.change_status(PlayerStatus::Dead));

        // The survivor is marked dead once the grace period elapses.
        assert!(
            eventually(|| b
                .players()
                .iter()
                .any(|p| p.id == a_id && p.status == PlayerStatus::Dead))
            .await
        );

        assert_ok!(a.change_status(PlayerStatus::Lobby));
        assert!(
            eventually(|| b
                .players()
                .iter()
                .any(|p| p.id == a_id && p.status == PlayerStatus::Lobby))
            .await
        );

        server.stop().await.unwrap();
    }

    /// Silent players are swept; pings keep others alive
    #[tokio::test]
    async fn inactive_players_are_removed() {
        let mut config = server_config(RoomMode::SingleRoom, WireFormat::Binary);
        config.inactive_player_timeout_millis = 300;
        let mut server = start_server(config).await;

        let chatty = Client::connect(ClientOptions {
            ping_interval: Duration::from_millis(50),
            ..options(&server, WireFormat::Binary)
        })
        .await
        .unwrap();
        assert_ok!(chatty.registered(WAIT).await);

        let quiet = Client::connect(ClientOptions {
            ping_interval: Duration::from_secs(60),
            ..options(&server, WireFormat::Binary)
        })
        .await
        .unwrap();
        assert_ok!(quiet.registered(WAIT).await);
        assert!(eventually(|| chatty.players().len() == 2).await);

        assert!(eventually(|| chatty.other_players().is_empty()).await);
        assert!(chatty.me().is_some());
        assert!(eventually(|| !quiet.is_connected()).await);

        server.stop().await.unwrap();
    }
}

/// TRANSPORT TESTS
mod transport_tests {
    use super::*;
    use shared::codec::{read_message, write_message};
    use shared::Message;
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    /// Newline-delimited JSON carries the same session
    #[tokio::test]
    async fn json_framing_session() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Json)).await;

        let a = join(&server, WireFormat::Json).await;
        let b = join(&server, WireFormat::Json).await;
        let b_id = b.me().unwrap().id;

        assert_ok!(b.update_score(80_000));
        assert!(eventually(|| a.score_for(b_id) == 80_000).await);
        assert_eq!(collect_damage(&a, 2).await, 2);

        server.stop().await.unwrap();
    }

    /// An unknown tag is skipped without closing the connection
    #[tokio::test]
    async fn unknown_tag_is_not_fatal() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Json)).await;

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"_m\":\"OnWormhole\",\"_p\":{\"x\":1}}\n")
            .await
            .unwrap();
        write_message(
            &mut write_half,
            WireFormat::Json,
            &Message::RegisterPlayer {
                app_version: shared::PROTOCOL_VERSION,
                room_id: None,
            },
        )
        .await
        .unwrap();

        let reply = tokio::time::timeout(WAIT, read_message(&mut reader, WireFormat::Json))
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(reply, Message::OnPlayerAdded { .. }));

        server.stop().await.unwrap();
    }

    /// Stopping the server is reported to clients as a graceful close
    #[tokio::test]
    async fn server_stop_is_graceful() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Binary)).await;
        let client = join(&server, WireFormat::Binary).await;

        let closed: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
        let closed_flag = Arc::clone(&closed);
        client.listen(Listeners::new().on_network_closed(move |graceful| {
            closed_flag.lock().unwrap().push(graceful);
        }));

        server.stop().await.unwrap();
        assert!(eventually(|| !closed.lock().unwrap().is_empty()).await);

        // Closing afterwards neither fails nor reports again.
        client.close();
        client.close();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*closed.lock().unwrap(), vec![true]);
    }

    /// A second `listen` replaces the first set of callbacks
    #[tokio::test]
    async fn listen_replaces_previous_listeners() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Binary)).await;
        let client = join(&server, WireFormat::Binary).await;

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        client.listen(Listeners::new().on_score_changed(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&second);
        client.listen(Listeners::new().on_score_changed(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_ok!(client.update_score(10));
        assert!(eventually(|| second.load(Ordering::SeqCst) == 1).await);
        assert_eq!(first.load(Ordering::SeqCst), 0);

        server.stop().await.unwrap();
    }

    /// Listeners run on the network task and may not touch caller state;
    /// dirty flags carry the news to the polling side
    #[tokio::test]
    async fn dirty_flags_follow_broadcasts() {
        let mut server = start_server(server_config(RoomMode::SingleRoom, WireFormat::Binary)).await;
        let a = join(&server, WireFormat::Binary).await;
        let _ = a.poll_changes();

        let started = Arc::new(AtomicBool::new(false));
        let _b = join(&server, WireFormat::Binary).await;
        assert!(eventually(|| a.poll_changes().players).await);

        let flag = Arc::clone(&started);
        a.listen(Listeners::new().on_start_game(move || flag.store(true, Ordering::SeqCst)));
        assert_ok!(a.start_game());
        assert!(eventually(|| started.load(Ordering::SeqCst)).await);
        assert!(a.poll_changes().start);

        server.stop().await.unwrap();
    }
}
