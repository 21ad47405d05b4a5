//! Authoritative player graph and lifecycle rules.
//!
//! [`GameState`] applies server-bound messages to rooms and players and
//! answers with the exact list of messages each connection must receive, in
//! order. It does no I/O, so the network layer stays a thin dispatcher and
//! every ordering rule can be tested directly.

use crate::config::ServerConfig;
use crate::room_manager::{Room, RoomManager, RoomPhase};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::games;
use shared::{Message, Player, PlayerId, PlayerStatus, RegistrationError, RoomId, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type ConnectionId = u64;

/// A message addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub connection: ConnectionId,
    pub message: Message,
}

impl Outgoing {
    pub fn new(connection: ConnectionId, message: Message) -> Self {
        Self {
            connection,
            message,
        }
    }
}

/// A round-end timer the network layer must start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub room_id: RoomId,
    pub generation: u64,
}

#[derive(Debug)]
struct PlayerEntry {
    player: Player,
    connection: ConnectionId,
    room_id: RoomId,
    last_seen: Instant,
}

pub struct GameState {
    rooms: RoomManager,
    players: HashMap<PlayerId, PlayerEntry>,
    by_connection: HashMap<ConnectionId, PlayerId>,
    next_player_id: PlayerId,
    include_beta_games: bool,
    enforce_monotonic_scores: bool,
    pending_finalize: Vec<FinalizeRequest>,
    rng: StdRng,
}

impl GameState {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &ServerConfig, rng: StdRng) -> Self {
        Self {
            rooms: RoomManager::new(config.rooms),
            players: HashMap::new(),
            by_connection: HashMap::new(),
            next_player_id: 1,
            include_beta_games: config.include_beta_games,
            enforce_monotonic_scores: config.enforce_monotonic_scores,
            pending_finalize: Vec::new(),
            rng,
        }
    }

    pub fn player_for(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.by_connection.get(&connection).copied()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id).map(|entry| &entry.player)
    }

    pub fn room_of(&self, id: PlayerId) -> Option<&Room> {
        self.players
            .get(&id)
            .and_then(|entry| self.rooms.get(entry.room_id))
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Connections of every registered player.
    pub fn registered_connections(&self) -> Vec<ConnectionId> {
        self.by_connection.keys().copied().collect()
    }

    /// Round-end timers requested since the last call.
    pub fn take_finalize_requests(&mut self) -> Vec<FinalizeRequest> {
        std::mem::take(&mut self.pending_finalize)
    }

    /// Records inbound traffic from a connection for the liveness sweep.
    pub fn touch(&mut self, connection: ConnectionId) {
        if let Some(id) = self.by_connection.get(&connection) {
            if let Some(entry) = self.players.get_mut(id) {
                entry.last_seen = Instant::now();
            }
        }
    }

    fn connections_in(&self, room_id: RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter_map(|id| self.players.get(id).map(|entry| entry.connection))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn broadcast(&self, room_id: RoomId, message: Message, out: &mut Vec<Outgoing>) {
        for connection in self.connections_in(room_id) {
            out.push(Outgoing::new(connection, message.clone()));
        }
    }

    /// Places an anonymous connection in a room as a new player.
    ///
    /// Existing members hear about the newcomer first. The newcomer then
    /// hears about itself followed by everyone already present, so the first
    /// `OnPlayerAdded` any client sees is its own.
    pub fn register(
        &mut self,
        connection: ConnectionId,
        app_version: u32,
        requested_room: Option<RoomId>,
    ) -> Result<Vec<Outgoing>, RegistrationError> {
        if self.by_connection.contains_key(&connection) {
            return Err(RegistrationError::AlreadyRegistered);
        }

        if app_version != PROTOCOL_VERSION {
            warn!(
                "Connection {} registered with version {} (server is {})",
                connection, app_version, PROTOCOL_VERSION
            );
        }

        let room_id = self.rooms.allocate(requested_room, &mut self.rng)?;
        let id = self.next_player_id;
        let game = games::random_game(&mut self.rng, self.include_beta_games);

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistrationError::UnknownRoom(room_id))?;
        let existing = room.members.clone();
        room.join(id)?;
        self.next_player_id += 1;

        let status = if room.phase == RoomPhase::Playing {
            PlayerStatus::Pending
        } else {
            PlayerStatus::Lobby
        };
        let player = Player::new(id, game).with_status(status);
        info!("Registered {} in room {}", player, room_id);

        let added = |player: &Player| Message::OnPlayerAdded {
            room_id,
            id: player.id,
            game: player.game.clone(),
            server_version: PROTOCOL_VERSION,
        };

        let mut out = Vec::new();
        for member in &existing {
            if let Some(entry) = self.players.get(member) {
                out.push(Outgoing::new(entry.connection, added(&player)));
            }
        }

        out.push(Outgoing::new(connection, added(&player)));

        let room_scores = self.rooms.get(room_id).map(|room| &room.scores);
        let mut late_status = Vec::new();
        let mut late_scores = Vec::new();
        for member in &existing {
            if let Some(entry) = self.players.get(member) {
                out.push(Outgoing::new(connection, added(&entry.player)));
                if entry.player.status != PlayerStatus::Lobby {
                    late_status.push(Message::OnPlayerStatusChange {
                        id: entry.player.id,
                        status: entry.player.status,
                    });
                }
                let score = room_scores.map(|s| s.score_for(*member)).unwrap_or(0);
                if score > 0 {
                    late_scores.push(Message::OnPlayerScored { id: *member, score });
                }
            }
        }
        out.extend(late_status.into_iter().map(|m| Outgoing::new(connection, m)));
        out.extend(late_scores.into_iter().map(|m| Outgoing::new(connection, m)));

        self.players.insert(
            id,
            PlayerEntry {
                player,
                connection,
                room_id,
                last_seen: Instant::now(),
            },
        );
        self.by_connection.insert(connection, id);

        if status == PlayerStatus::Pending {
            self.broadcast(room_id, Message::OnPlayerStatusChange { id, status }, &mut out);
        }

        Ok(out)
    }

    /// Removes a player and tells the rest of its room. Unknown ids are a
    /// no-op with nothing to send.
    pub fn unregister(&mut self, id: PlayerId) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let entry = match self.players.remove(&id) {
            Some(entry) => entry,
            None => return out,
        };
        self.by_connection.remove(&entry.connection);
        self.rooms.leave(entry.room_id, id);
        info!("Removed {} from room {}", entry.player, entry.room_id);

        self.broadcast(entry.room_id, Message::OnPlayerRemoved { id }, &mut out);
        self.check_round_end(entry.room_id);
        out
    }

    /// Handles the loss of a transport, registered or not.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Outgoing> {
        match self.player_for(connection) {
            Some(id) => self.unregister(id),
            None => Vec::new(),
        }
    }

    /// Resets the room's scores and puts every member into play.
    pub fn start_game(&mut self, id: PlayerId) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let room_id = match self.players.get(&id) {
            Some(entry) => entry.room_id,
            None => return out,
        };

        let members = match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.cancel_finalize();
                room.scores.clear();
                room.final_scores.clear();
                room.phase = RoomPhase::Playing;
                room.members.clone()
            }
            None => return out,
        };

        for member in &members {
            if let Some(entry) = self.players.get_mut(member) {
                entry.player.status = PlayerStatus::Playing;
            }
        }

        info!("Player {} started a game in room {}", id, room_id);
        self.broadcast(room_id, Message::OnStartGame {}, &mut out);
        out
    }

    /// Records a score and broadcasts it, along with the attack it produces.
    pub fn update_score(&mut self, id: PlayerId, score: u64) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let room_id = match self.players.get(&id) {
            Some(entry) => entry.room_id,
            None => return out,
        };

        let enforce_monotonic = self.enforce_monotonic_scores;
        let strength = match self.rooms.get_mut(room_id) {
            Some(room) => {
                let current = room.scores.score_for(id);
                if enforce_monotonic && score < current {
                    warn!(
                        "Ignoring decreasing score {} for player {} (was {})",
                        score, id, current
                    );
                    return out;
                }
                room.scores.record(id, score)
            }
            None => return out,
        };

        self.broadcast(room_id, Message::OnPlayerScored { id, score }, &mut out);

        if strength > 0 {
            debug!("Player {} crossed {} breakpoint(s)", id, strength);
            self.broadcast(room_id, Message::OnScoreBreakpoint { id, strength }, &mut out);
        }

        out
    }

    pub fn update_status(&mut self, id: PlayerId, status: PlayerStatus) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let include_beta = self.include_beta_games;
        let room_id = match self.players.get_mut(&id) {
            Some(entry) => {
                entry.player.status = status;
                if status == PlayerStatus::Lobby {
                    entry.player.game = games::random_game(&mut self.rng, include_beta).to_string();
                }
                entry.room_id
            }
            None => return out,
        };

        if status == PlayerStatus::Lobby {
            let game = self
                .player(id)
                .map(|p| p.game.clone())
                .unwrap_or_default();
            self.broadcast(room_id, Message::OnPlayerReturnedToLobby { id, game }, &mut out);
            self.maybe_return_room_to_lobby(room_id, &mut out);
        } else {
            self.broadcast(room_id, Message::OnPlayerStatusChange { id, status }, &mut out);
            if status == PlayerStatus::Dead {
                self.check_round_end(room_id);
            }
        }

        out
    }

    fn statuses_in(&self, room_id: RoomId) -> Vec<(PlayerId, PlayerStatus)> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter_map(|id| self.players.get(id).map(|e| (*id, e.player.status)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Once nobody is in a round any more, the room is back in the lobby and
    /// anyone who joined mid-round stops waiting.
    fn maybe_return_room_to_lobby(&mut self, room_id: RoomId, out: &mut Vec<Outgoing>) {
        let statuses = self.statuses_in(room_id);
        let in_round = statuses
            .iter()
            .any(|(_, s)| matches!(s, PlayerStatus::Playing | PlayerStatus::Dead));
        if in_round {
            return;
        }

        if let Some(room) = self.rooms.get_mut(room_id) {
            if room.phase == RoomPhase::Lobby {
                return;
            }
            room.cancel_finalize();
            room.phase = RoomPhase::Lobby;
        }

        for (id, status) in statuses {
            if status == PlayerStatus::Pending {
                if let Some(entry) = self.players.get_mut(&id) {
                    entry.player.status = PlayerStatus::Lobby;
                }
                self.broadcast(
                    room_id,
                    Message::OnPlayerStatusChange {
                        id,
                        status: PlayerStatus::Lobby,
                    },
                    out,
                );
            }
        }
    }

    /// Schedules finalization once at most one player is still playing.
    fn check_round_end(&mut self, room_id: RoomId) {
        let playing = self
            .statuses_in(room_id)
            .iter()
            .filter(|(_, s)| *s == PlayerStatus::Playing)
            .count();

        let room = match self.rooms.get_mut(room_id) {
            Some(room) => room,
            None => return,
        };

        if room.phase != RoomPhase::Playing || room.finalize_scheduled || playing > 1 {
            return;
        }

        room.finalize_scheduled = true;
        room.finalize_generation += 1;
        debug!(
            "Room {} has {} player(s) left alive, scheduling final scores",
            room_id, playing
        );
        self.pending_finalize.push(FinalizeRequest {
            room_id,
            generation: room.finalize_generation,
        });
    }

    /// Ends the round: survivors are marked dead and the ranking is frozen.
    /// Stale requests (a new round started since) are ignored.
    pub fn finalize_round(&mut self, request: FinalizeRequest) -> Vec<Outgoing> {
        let mut out = Vec::new();
        let members = match self.rooms.get(request.room_id) {
            Some(room)
                if room.finalize_scheduled
                    && room.finalize_generation == request.generation
                    && room.phase == RoomPhase::Playing =>
            {
                room.members.clone()
            }
            _ => return out,
        };

        for id in members {
            let still_playing = self
                .players
                .get(&id)
                .map(|entry| entry.player.is_playing())
                .unwrap_or(false);
            if still_playing {
                if let Some(entry) = self.players.get_mut(&id) {
                    entry.player.status = PlayerStatus::Dead;
                }
                self.broadcast(
                    request.room_id,
                    Message::OnPlayerStatusChange {
                        id,
                        status: PlayerStatus::Dead,
                    },
                    &mut out,
                );
            }
        }

        if let Some(room) = self.rooms.get_mut(request.room_id) {
            room.final_scores = room.scores.ranking();
            room.phase = RoomPhase::PostGame;
            room.finalize_scheduled = false;
            info!("Room {} final scores: {:?}", room.id, room.final_scores);
        }

        out
    }

    /// Removes players silent for longer than `timeout`, returning their
    /// connections (to be closed) and the resulting broadcasts.
    pub fn sweep_inactive(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> (Vec<ConnectionId>, Vec<Outgoing>) {
        let expired: Vec<(PlayerId, ConnectionId)> = self
            .players
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|(id, entry)| (*id, entry.connection))
            .collect();

        let mut out = Vec::new();
        let mut connections = Vec::new();
        for (id, connection) in expired {
            info!("Player {} timed out", id);
            out.extend(self.unregister(id));
            connections.push(connection);
        }

        (connections, out)
    }
}
