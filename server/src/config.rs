//! Server configuration.
//!
//! Built from command line arguments by the `server` binary, or directly by
//! a peer-hosting client which embeds the server in-process.

use shared::{WireFormat, DEFAULT_PORT};
use std::time::Duration;

/// Capacity of rooms whose mode does not specify one.
pub const DEFAULT_ROOM_CAPACITY: usize = 16;

/// How often the liveness sweep looks for silent players.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// How players are grouped into rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    /// One fixed room that survives being emptied. Used for LAN play.
    SingleRoom,
    /// Players are dropped into any room with space; rooms are created on
    /// demand up to `max_rooms` and deleted once empty.
    PublicRandomRooms { room_size: usize, max_rooms: usize },
    /// Players create a room and share its id, or join by id.
    MultiplePrivateRooms,
}

impl RoomMode {
    pub fn name(&self) -> &'static str {
        match self {
            RoomMode::SingleRoom => "singleRoom",
            RoomMode::PublicRandomRooms { .. } => "publicRandomRooms",
            RoomMode::MultiplePrivateRooms => "multiplePrivateRooms",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rooms: RoomMode,
    /// Grace period between the round being decided and scores being final.
    pub final_score_duration_millis: u64,
    /// Players silent for longer than this are removed.
    pub inactive_player_timeout_millis: u64,
    pub include_beta_games: bool,
    pub wire_format: WireFormat,
    /// Ignore score updates lower than the player's current score.
    pub enforce_monotonic_scores: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            rooms: RoomMode::SingleRoom,
            final_score_duration_millis: 5_000,
            inactive_player_timeout_millis: 60_000,
            include_beta_games: false,
            wire_format: WireFormat::Binary,
            enforce_monotonic_scores: false,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn final_score_duration(&self) -> Duration {
        Duration::from_millis(self.final_score_duration_millis)
    }

    pub fn inactive_player_timeout(&self) -> Duration {
        Duration::from_millis(self.inactive_player_timeout_millis)
    }
}
