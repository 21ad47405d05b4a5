//! Performance benchmarks for the hot paths of the coordination layer

use server::config::{RoomMode, ServerConfig};
use server::game::GameState;
use shared::codec::{decode_body, encode_body};
use shared::{Message, PlayerScores, PlayerStatus, WireFormat, PROTOCOL_VERSION};
use std::time::Instant;

fn sample_traffic() -> Vec<Message> {
    vec![
        Message::UpdateScore { score: 123_456 },
        Message::OnPlayerScored {
            id: 7,
            score: 98_765,
        },
        Message::OnPlayerStatusChange {
            id: 7,
            status: PlayerStatus::Dead,
        },
        Message::OnPlayerAdded {
            room_id: 482_913,
            id: 7,
            game: "space-invaders".to_string(),
            server_version: PROTOCOL_VERSION,
        },
        Message::OnScoreBreakpoint { id: 7, strength: 2 },
        Message::Ping {},
    ]
}

/// Benchmarks encoding and decoding with both framings
#[test]
fn benchmark_message_codec() {
    let messages = sample_traffic();
    let iterations = 10_000;

    for format in [WireFormat::Binary, WireFormat::Json] {
        let start = Instant::now();
        let mut bytes = 0;

        for _ in 0..iterations {
            for message in &messages {
                let body = encode_body(format, message).unwrap();
                bytes += body.len();
                let decoded = decode_body(format, &body).unwrap();
                assert_eq!(&decoded, message);
            }
        }

        let duration = start.elapsed();
        let count = iterations * messages.len();
        println!(
            "{} codec: {} messages ({} bytes) in {:?} ({:.2} μs/msg)",
            format,
            count,
            bytes,
            duration,
            duration.as_micros() as f64 / count as f64
        );

        // 60k messages should comfortably finish within two seconds
        assert!(duration.as_secs() < 2);
    }
}

/// Binary bodies should stay well below their JSON equivalents
#[test]
fn benchmark_frame_sizes() {
    for message in sample_traffic() {
        let binary = encode_body(WireFormat::Binary, &message).unwrap();
        let json = encode_body(WireFormat::Json, &message).unwrap();
        println!(
            "{}: binary {} bytes, json {} bytes",
            message.tag(),
            binary.len(),
            json.len()
        );
        assert!(binary.len() < json.len());
    }
}

/// Benchmarks breakpoint bookkeeping for a full room of fast scorers
#[test]
fn benchmark_breakpoint_tracking() {
    let mut scores = PlayerScores::new();
    let players = 16u64;
    let updates = 100_000u64;
    let start = Instant::now();
    let mut attacks = 0u64;

    for step in 0..updates {
        let player = step % players;
        let score = (step / players) * 1_000;
        attacks += u64::from(scores.record(player, score));
    }

    let duration = start.elapsed();
    println!(
        "Breakpoints: {} updates in {:?} ({} attacks)",
        updates, duration, attacks
    );

    let final_score = ((updates - 1) / players) * 1_000;
    let expected_per_player = final_score / scores.breakpoint_size();
    assert_eq!(attacks, expected_per_player * players);
    assert!(duration.as_millis() < 500);
}

/// Stress tests registration churn against the room capacity rule
#[test]
fn stress_test_registration_churn() {
    let config = ServerConfig {
        rooms: RoomMode::PublicRandomRooms {
            room_size: 4,
            max_rooms: 8,
        },
        ..ServerConfig::default()
    };
    let mut state = GameState::new(&config);
    let start = Instant::now();
    let mut live = Vec::new();
    let mut broadcasts = 0usize;

    for connection in 0..20_000u64 {
        match state.register(connection, PROTOCOL_VERSION, None) {
            Ok(out) => {
                broadcasts += out.len();
                live.push(connection);
            }
            Err(_) => {
                let leaving = live.remove(connection as usize % live.len());
                broadcasts += state.disconnect(leaving).len();
            }
        }

        assert!(state.player_count() <= 32);
        for room_id in live
            .iter()
            .filter_map(|c| state.player_for(*c))
            .filter_map(|id| state.room_of(id).map(|room| room.id))
        {
            let room = state.rooms().get(room_id).unwrap();
            assert!(room.len() <= room.capacity);
        }
    }

    let duration = start.elapsed();
    println!(
        "Registration churn: 20000 connections, {} deliveries in {:?}",
        broadcasts, duration
    );
    assert!(duration.as_secs() < 10);
}
