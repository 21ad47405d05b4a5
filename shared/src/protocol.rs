//! The message set exchanged between the server and client proxies.
//!
//! Messages are plain events: each carries a type tag and a payload and is
//! understood without any connection-level context. Tag names and the short
//! payload keys below are the compatibility surface between releases; renaming
//! either breaks every older peer.
//!
//! Variant order matters for the binary framing (bincode encodes the variant
//! index), so new messages are only ever appended, and [`Message::TAGS`] must
//! list them in declaration order.

use crate::player::{PlayerId, PlayerStatus, RoomId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // Server-bound
    /// Without a room id the server picks (or creates) a room according to
    /// its room mode.
    RegisterPlayer {
        #[serde(rename = "v")]
        app_version: u32,
        #[serde(rename = "r", default)]
        room_id: Option<RoomId>,
    },
    StartGame {},
    UnregisterPlayer {},
    UpdateScore {
        #[serde(rename = "s")]
        score: u64,
    },
    UpdateStatus {
        #[serde(rename = "s")]
        status: PlayerStatus,
    },
    /// Keep-alive so idle lobby players survive the inactivity sweep.
    Ping {},

    // Client-bound
    /// The first of these a new client receives always describes itself.
    OnPlayerAdded {
        #[serde(rename = "r")]
        room_id: RoomId,
        #[serde(rename = "i")]
        id: PlayerId,
        #[serde(rename = "g")]
        game: String,
        #[serde(rename = "v")]
        server_version: u32,
    },
    OnPlayerRemoved {
        #[serde(rename = "i")]
        id: PlayerId,
    },
    OnPlayerScored {
        #[serde(rename = "i")]
        id: PlayerId,
        #[serde(rename = "s")]
        score: u64,
    },
    OnPlayerStatusChange {
        #[serde(rename = "i")]
        id: PlayerId,
        #[serde(rename = "s")]
        status: PlayerStatus,
    },
    OnPlayerReturnedToLobby {
        #[serde(rename = "i")]
        id: PlayerId,
        #[serde(rename = "g")]
        game: String,
    },
    OnStartGame {},
    OnServerStopped {},
    /// Player `id` crossed `strength` breakpoints; everyone else takes that
    /// much damage.
    OnScoreBreakpoint {
        #[serde(rename = "i")]
        id: PlayerId,
        #[serde(rename = "n")]
        strength: u32,
    },
}

impl Message {
    pub const TAGS: &'static [&'static str] = &[
        "RegisterPlayer",
        "StartGame",
        "UnregisterPlayer",
        "UpdateScore",
        "UpdateStatus",
        "Ping",
        "OnPlayerAdded",
        "OnPlayerRemoved",
        "OnPlayerScored",
        "OnPlayerStatusChange",
        "OnPlayerReturnedToLobby",
        "OnStartGame",
        "OnServerStopped",
        "OnScoreBreakpoint",
    ];

    pub fn is_known_tag(tag: &str) -> bool {
        Self::TAGS.contains(&tag)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Message::RegisterPlayer { .. } => "RegisterPlayer",
            Message::StartGame {} => "StartGame",
            Message::UnregisterPlayer {} => "UnregisterPlayer",
            Message::UpdateScore { .. } => "UpdateScore",
            Message::UpdateStatus { .. } => "UpdateStatus",
            Message::Ping {} => "Ping",
            Message::OnPlayerAdded { .. } => "OnPlayerAdded",
            Message::OnPlayerRemoved { .. } => "OnPlayerRemoved",
            Message::OnPlayerScored { .. } => "OnPlayerScored",
            Message::OnPlayerStatusChange { .. } => "OnPlayerStatusChange",
            Message::OnPlayerReturnedToLobby { .. } => "OnPlayerReturnedToLobby",
            Message::OnStartGame {} => "OnStartGame",
            Message::OnServerStopped {} => "OnServerStopped",
            Message::OnScoreBreakpoint { .. } => "OnScoreBreakpoint",
        }
    }

    /// True for messages a client sends to the server.
    pub fn is_server_bound(&self) -> bool {
        matches!(
            self,
            Message::RegisterPlayer { .. }
                | Message::StartGame {}
                | Message::UnregisterPlayer {}
                | Message::UpdateScore { .. }
                | Message::UpdateStatus { .. }
                | Message::Ping {}
        )
    }
}
