//! Client-side mirror of the room, built only from server broadcasts.

use log::{debug, warn};
use shared::{Message, Player, PlayerId, PlayerStatus, RoomId, PROTOCOL_VERSION};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// What a processed broadcast changed, in the order listeners should hear it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PlayersChanged,
    ScoreChanged { id: PlayerId, score: u64 },
    StatusChanged { id: PlayerId, status: PlayerStatus },
    StartGame,
    /// An opponent crossed breakpoints; the strength is already queued.
    Attacked { from: PlayerId, strength: u32 },
    ServerStopped,
}

/// Local copy of the room.
///
/// Nothing here is ever asserted locally: every field changes only in
/// [`SessionMirror::apply`], so the mirror converges on what the server says.
#[derive(Debug, Default)]
pub struct SessionMirror {
    me: Option<PlayerId>,
    room_id: Option<RoomId>,
    server_version: Option<u32>,
    players: BTreeMap<PlayerId, Player>,
    scores: HashMap<PlayerId, u64>,
    pending_damage: u32,
    server_stopped: bool,
}

impl SessionMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn me(&self) -> Option<&Player> {
        self.me.and_then(|id| self.players.get(&id))
    }

    pub fn me_id(&self) -> Option<PlayerId> {
        self.me
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    pub fn server_version(&self) -> Option<u32> {
        self.server_version
    }

    pub fn version_mismatch(&self) -> bool {
        self.server_version
            .map(|version| version != PROTOCOL_VERSION)
            .unwrap_or(false)
    }

    /// Every known player, including this one, ordered by id.
    pub fn players(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    pub fn other_players(&self) -> Vec<Player> {
        self.players
            .values()
            .filter(|player| Some(player.id) != self.me)
            .cloned()
            .collect()
    }

    pub fn score_for(&self, id: PlayerId) -> u64 {
        self.scores.get(&id).copied().unwrap_or(0)
    }

    pub fn server_stopped(&self) -> bool {
        self.server_stopped
    }

    /// Returns the summed strength of attacks received since the last call.
    pub fn take_damage(&mut self) -> u32 {
        std::mem::take(&mut self.pending_damage)
    }

    /// Applies one inbound message.
    pub fn apply(&mut self, message: &Message) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match message {
            Message::OnPlayerAdded {
                room_id,
                id,
                game,
                server_version,
            } => {
                if self.me.is_none() {
                    self.me = Some(*id);
                    self.room_id = Some(*room_id);
                    self.server_version = Some(*server_version);
                    if *server_version != PROTOCOL_VERSION {
                        warn!(
                            "Server speaks version {}, this client {}",
                            server_version, PROTOCOL_VERSION
                        );
                    }
                    debug!("Registered as player {} in room {}", id, room_id);
                }
                self.players.insert(*id, Player::new(*id, game.clone()));
                events.push(SessionEvent::PlayersChanged);
            }

            Message::OnPlayerRemoved { id } => {
                self.scores.remove(id);
                if self.players.remove(id).is_some() {
                    events.push(SessionEvent::PlayersChanged);
                }
            }

            Message::OnPlayerScored { id, score } => {
                self.scores.insert(*id, *score);
                events.push(SessionEvent::ScoreChanged {
                    id: *id,
                    score: *score,
                });
            }

            Message::OnPlayerStatusChange { id, status } => {
                if let Some(player) = self.players.get_mut(id) {
                    player.status = *status;
                }
                events.push(SessionEvent::StatusChanged {
                    id: *id,
                    status: *status,
                });
            }

            Message::OnPlayerReturnedToLobby { id, game } => {
                if let Some(player) = self.players.get_mut(id) {
                    player.status = PlayerStatus::Lobby;
                    player.game = game.clone();
                }
                events.push(SessionEvent::StatusChanged {
                    id: *id,
                    status: PlayerStatus::Lobby,
                });
            }

            Message::OnStartGame {} => {
                self.scores.clear();
                self.pending_damage = 0;
                for player in self.players.values_mut() {
                    player.status = PlayerStatus::Playing;
                }
                events.push(SessionEvent::StartGame);
            }

            Message::OnScoreBreakpoint { id, strength } => {
                if Some(*id) != self.me && *strength > 0 {
                    self.pending_damage = self.pending_damage.saturating_add(*strength);
                    events.push(SessionEvent::Attacked {
                        from: *id,
                        strength: *strength,
                    });
                }
            }

            Message::OnServerStopped {} => {
                self.server_stopped = true;
                events.push(SessionEvent::ServerStopped);
            }

            other => warn!("Ignoring server-bound {} sent by the server", other.tag()),
        }

        events
    }
}

/// Change markers set on the network task and drained on the render thread.
#[derive(Debug, Default)]
pub struct DirtyFlags {
    players: AtomicBool,
    scores: AtomicBool,
    start: AtomicBool,
}

/// A drained snapshot of [`DirtyFlags`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    pub players: bool,
    pub scores: bool,
    pub start: bool,
}

impl Changes {
    pub fn any(&self) -> bool {
        self.players || self.scores || self.start
    }
}

impl DirtyFlags {
    pub fn mark(&self, event: &SessionEvent) {
        match event {
            SessionEvent::PlayersChanged | SessionEvent::StatusChanged { .. } => {
                self.players.store(true, Ordering::Release)
            }
            SessionEvent::ScoreChanged { .. } => self.scores.store(true, Ordering::Release),
            SessionEvent::StartGame => self.start.store(true, Ordering::Release),
            SessionEvent::Attacked { .. } | SessionEvent::ServerStopped => {}
        }
    }

    pub fn take(&self) -> Changes {
        Changes {
            players: self.players.swap(false, Ordering::AcqRel),
            scores: self.scores.swap(false, Ordering::AcqRel),
            start: self.start.swap(false, Ordering::AcqRel),
        }
    }
}
