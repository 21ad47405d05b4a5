//! Room bookkeeping and allocation for the coordination server
//!
//! This module decides which room a registering player lands in and keeps the
//! membership of every room within its capacity:
//! - Room selection and creation according to the configured [`RoomMode`]
//! - Capacity enforcement on join
//! - Deletion of dynamically created rooms once their last member leaves
//!
//! It holds no connections and sends nothing; the game state layered on top
//! turns membership changes into broadcasts.

use crate::config::{RoomMode, DEFAULT_ROOM_CAPACITY};
use log::info;
use rand::Rng;
use shared::{PlayerId, PlayerScores, RegistrationError, RoomId};
use std::collections::HashMap;

/// Id of the fixed room used in [`RoomMode::SingleRoom`].
pub const DEFAULT_ROOM_ID: RoomId = 0;

/// Where a room is in its round cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Lobby,
    Playing,
    /// The round has been decided and its final scores captured.
    PostGame,
}

/// A group of players sharing one multiplayer session
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub capacity: usize,
    /// Dynamic rooms are deleted when emptied; the fixed room is not.
    pub dynamic: bool,
    pub phase: RoomPhase,
    /// Members in join order.
    pub members: Vec<PlayerId>,
    pub scores: PlayerScores,
    /// Ranking captured when the last round was finalized.
    pub final_scores: Vec<(PlayerId, u64)>,
    /// Bumped whenever a scheduled finalization becomes stale.
    pub finalize_generation: u64,
    pub finalize_scheduled: bool,
}

impl Room {
    pub fn new(id: RoomId, capacity: usize, dynamic: bool) -> Self {
        Self {
            id,
            capacity,
            dynamic,
            phase: RoomPhase::Lobby,
            members: Vec::new(),
            scores: PlayerScores::new(),
            final_scores: Vec::new(),
            finalize_generation: 0,
            finalize_scheduled: false,
        }
    }

    pub fn has_space(&self) -> bool {
        self.members.len() < self.capacity
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.members.contains(&player)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds a member, refusing duplicates and anything past capacity.
    pub fn join(&mut self, player: PlayerId) -> Result<(), RegistrationError> {
        if self.contains(player) {
            return Ok(());
        }
        if !self.has_space() {
            return Err(RegistrationError::RoomFull(self.id));
        }
        self.members.push(player);
        Ok(())
    }

    /// Returns true if the player was a member.
    pub fn leave(&mut self, player: PlayerId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| *member != player);
        self.scores.remove(player);
        before != self.members.len()
    }

    /// Invalidates any finalization timer already in flight.
    pub fn cancel_finalize(&mut self) {
        self.finalize_scheduled = false;
        self.finalize_generation += 1;
    }
}

/// Owns every room and applies the configured allocation policy
pub struct RoomManager {
    mode: RoomMode,
    rooms: HashMap<RoomId, Room>,
}

impl RoomManager {
    /// Creates a manager; single-room servers get their fixed room up front.
    pub fn new(mode: RoomMode) -> Self {
        let mut rooms = HashMap::new();
        if mode == RoomMode::SingleRoom {
            rooms.insert(
                DEFAULT_ROOM_ID,
                Room::new(DEFAULT_ROOM_ID, DEFAULT_ROOM_CAPACITY, false),
            );
        }

        Self { mode, rooms }
    }

    pub fn mode(&self) -> RoomMode {
        self.mode
    }

    /// Picks the room a new player should join, creating one if the mode
    /// allows it.
    ///
    /// The returned room is guaranteed to have space at the time of the call.
    /// A requested id is only honoured for private rooms.
    pub fn allocate<R: Rng>(
        &mut self,
        requested: Option<RoomId>,
        rng: &mut R,
    ) -> Result<RoomId, RegistrationError> {
        match self.mode {
            RoomMode::SingleRoom => {
                let room = self
                    .rooms
                    .entry(DEFAULT_ROOM_ID)
                    .or_insert_with(|| Room::new(DEFAULT_ROOM_ID, DEFAULT_ROOM_CAPACITY, false));
                if room.has_space() {
                    Ok(room.id)
                } else {
                    Err(RegistrationError::RoomFull(room.id))
                }
            }

            RoomMode::PublicRandomRooms {
                room_size,
                max_rooms,
            } => {
                let mut open: Vec<&Room> = self.rooms.values().filter(|r| r.has_space()).collect();
                open.sort_by_key(|room| room.id);
                if let Some(room) = open.first() {
                    return Ok(room.id);
                }

                if self.rooms.len() >= max_rooms {
                    return Err(RegistrationError::ServerFull(max_rooms));
                }

                // A room nobody can join would never be deleted.
                Ok(self.create_room(room_size.max(1), rng))
            }

            RoomMode::MultiplePrivateRooms => match requested {
                Some(id) => match self.rooms.get(&id) {
                    Some(room) if room.has_space() => Ok(id),
                    Some(_) => Err(RegistrationError::RoomFull(id)),
                    None => Err(RegistrationError::UnknownRoom(id)),
                },
                None => Ok(self.create_room(DEFAULT_ROOM_CAPACITY, rng)),
            },
        }
    }

    fn create_room<R: Rng>(&mut self, capacity: usize, rng: &mut R) -> RoomId {
        let mut id = rng.gen_range(100_000..1_000_000);
        while self.rooms.contains_key(&id) {
            id = rng.gen_range(100_000..1_000_000);
        }

        info!("Created room {} (capacity {})", id, capacity);
        self.rooms.insert(id, Room::new(id, capacity, true));
        id
    }

    /// Removes a player from a room, deleting the room if it is dynamic and
    /// now empty. Returns true if the player was a member.
    pub fn leave(&mut self, room_id: RoomId, player: PlayerId) -> bool {
        let (removed, now_empty) = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                let removed = room.leave(player);
                (removed, room.dynamic && room.is_empty())
            }
            None => return false,
        };

        if now_empty {
            self.rooms.remove(&room_id);
            info!("Deleted empty room {}", room_id);
        }

        removed
    }

    pub fn get(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn get_mut(&mut self, room_id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn player_count(&self) -> usize {
        self.rooms.values().map(Room::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn join(manager: &mut RoomManager, requested: Option<RoomId>, player: PlayerId) -> RoomId {
        let room_id = manager.allocate(requested, &mut rng()).unwrap();
        manager.get_mut(room_id).unwrap().join(player).unwrap();
        room_id
    }

    #[test]
    fn test_single_room_is_fixed() {
        let mut manager = RoomManager::new(RoomMode::SingleRoom);
        assert_eq!(manager.room_count(), 1);

        let room_id = join(&mut manager, Some(999), 1);
        assert_eq!(room_id, DEFAULT_ROOM_ID);

        assert!(manager.leave(room_id, 1));
        assert_eq!(manager.room_count(), 1);
        assert!(manager.get(DEFAULT_ROOM_ID).unwrap().is_empty());
    }

    #[test]
    fn test_room_join_enforces_capacity() {
        let mut room = Room::new(1, 2, true);
        assert!(room.join(1).is_ok());
        assert!(room.join(2).is_ok());
        assert_eq!(room.join(3), Err(RegistrationError::RoomFull(1)));
        assert_eq!(room.len(), 2);

        // Re-joining is a no-op rather than a second seat.
        assert!(room.join(2).is_ok());
        assert_eq!(room.len(), 2);
    }

    #[test]
    fn test_public_rooms_fill_before_creating() {
        let mut manager = RoomManager::new(RoomMode::PublicRandomRooms {
            room_size: 2,
            max_rooms: 2,
        });
        assert_eq!(manager.room_count(), 0);

        let first = join(&mut manager, None, 1);
        let second = join(&mut manager, None, 2);
        assert_eq!(first, second);

        let third = join(&mut manager, None, 3);
        assert_ne!(third, first);
        join(&mut manager, None, 4);
        assert_eq!(manager.room_count(), 2);

        assert_eq!(
            manager.allocate(None, &mut rng()),
            Err(RegistrationError::ServerFull(2))
        );
    }

    #[test]
    fn test_zero_room_size_still_seats_a_player() {
        let mut manager = RoomManager::new(RoomMode::PublicRandomRooms {
            room_size: 0,
            max_rooms: 1,
        });
        let room_id = join(&mut manager, None, 1);
        assert_eq!(manager.get(room_id).unwrap().capacity, 1);

        assert!(manager.leave(room_id, 1));
        assert_eq!(manager.room_count(), 0);
    }

    #[test]
    fn test_empty_dynamic_room_is_deleted() {
        let mut manager = RoomManager::new(RoomMode::PublicRandomRooms {
            room_size: 4,
            max_rooms: 1,
        });
        let room_id = join(&mut manager, None, 1);
        join(&mut manager, None, 2);

        assert!(manager.leave(room_id, 1));
        assert_eq!(manager.room_count(), 1);
        assert!(manager.leave(room_id, 2));
        assert_eq!(manager.room_count(), 0);
        assert!(!manager.leave(room_id, 2));
    }

    #[test]
    fn test_private_rooms_by_id() {
        let mut manager = RoomManager::new(RoomMode::MultiplePrivateRooms);

        let created = join(&mut manager, None, 1);
        assert!((100_000..1_000_000).contains(&created));

        let joined = join(&mut manager, Some(created), 2);
        assert_eq!(joined, created);
        assert_eq!(manager.player_count(), 2);

        assert_eq!(
            manager.allocate(Some(42), &mut rng()),
            Err(RegistrationError::UnknownRoom(42))
        );
    }

    #[test]
    fn test_capacity_never_exceeded_under_churn() {
        let mut manager = RoomManager::new(RoomMode::PublicRandomRooms {
            room_size: 3,
            max_rooms: 1,
        });
        let mut rng = rng();
        let mut members: Vec<(RoomId, PlayerId)> = Vec::new();

        for player in 0..200u64 {
            if player % 3 == 2 && !members.is_empty() {
                let (room_id, leaving) = members.remove(0);
                manager.leave(room_id, leaving);
            }
            if let Ok(room_id) = manager.allocate(None, &mut rng) {
                let room = manager.get_mut(room_id).unwrap();
                if room.join(player).is_ok() {
                    members.push((room_id, player));
                }
            }
            assert!(manager.player_count() <= 3);
        }
    }
}
