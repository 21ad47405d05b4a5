use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PlayerId = u64;
pub type RoomId = u64;

/// Where a player is in the round lifecycle.
///
/// `Pending` players joined a room mid-round and sit out until the next
/// `StartGame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Pending,
    Lobby,
    Playing,
    Dead,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Pending => "pending",
            PlayerStatus::Lobby => "lobby",
            PlayerStatus::Playing => "playing",
            PlayerStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlayerStatus::Pending),
            "lobby" => Ok(PlayerStatus::Lobby),
            "playing" => Ok(PlayerStatus::Playing),
            "dead" => Ok(PlayerStatus::Dead),
            other => Err(format!("unknown player status '{}'", other)),
        }
    }
}

/// A participant as seen by either peer.
///
/// The server owns the authoritative copy; clients hold mirrors built purely
/// from broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Identifier from [`crate::games::ALL`].
    pub game: String,
    pub status: PlayerStatus,
}

impl Player {
    pub fn new(id: PlayerId, game: impl Into<String>) -> Self {
        Self {
            id,
            game: game.into(),
            status: PlayerStatus::Lobby,
        }
    }

    pub fn with_status(mut self, status: PlayerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlayerStatus::Playing
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Player[id: {}, game: {}, status: {}]",
            self.id, self.game, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_creation() {
        let player = Player::new(7, "snake");
        assert_eq!(player.id, 7);
        assert_eq!(player.game, "snake");
        assert_eq!(player.status, PlayerStatus::Lobby);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_status_string_forms() {
        for status in [
            PlayerStatus::Pending,
            PlayerStatus::Lobby,
            PlayerStatus::Playing,
            PlayerStatus::Dead,
        ] {
            assert_eq!(status.as_str().parse::<PlayerStatus>(), Ok(status));
        }
        assert!("zombie".parse::<PlayerStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&PlayerStatus::Playing).unwrap();
        assert_eq!(json, "\"playing\"");
    }
}
