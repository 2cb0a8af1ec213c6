//! Room manager: owner of the live-room collection.
//!
//! The `DashMap::remove` inside [`RoomManager::remove`] is the single point
//! of no return when a match finishes or is cancelled: exactly one caller
//! gets the room back, so terminal notifications and the record-service
//! call cannot be emitted twice even under concurrent cancellation.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::game::room::{GameState, Room};

/// Watch-list entry for one live room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRoomInfo {
    pub room_id: Uuid,
    pub player_names: [String; 2],
    pub scores: [u32; 2],
}

pub struct RoomManager {
    rooms: DashMap<Uuid, Arc<Mutex<Room>>>,
    /// Player user id -> room. Players only; a user is in at most one room
    /// as a player.
    members: DashMap<String, Uuid>,
    /// Spectator connection id -> (room, user id).
    watchers: DashMap<Uuid, (Uuid, String)>,
}

pub fn lock_room(room: &Arc<Mutex<Room>>) -> MutexGuard<'_, Room> {
    room.lock().expect("room lock poisoned")
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            members: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    /// Register a freshly created room and its two players.
    pub fn insert(&self, room: Room) -> Arc<Mutex<Room>> {
        let room_id = room.id;
        for player in &room.players {
            self.members.insert(player.user_id.clone(), room_id);
        }
        let arc = Arc::new(Mutex::new(room));
        self.rooms.insert(room_id, arc.clone());
        arc
    }

    pub fn get(&self, room_id: Uuid) -> Option<Arc<Mutex<Room>>> {
        self.rooms.get(&room_id).map(|entry| entry.value().clone())
    }

    pub fn room_of_player(&self, user_id: &str) -> Option<(Uuid, Arc<Mutex<Room>>)> {
        let room_id = *self.members.get(user_id)?;
        Some((room_id, self.get(room_id)?))
    }

    pub fn is_player(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    /// Point a spectator connection at a room. Returns the entry this
    /// connection previously watched, if any, so the caller can detach it
    /// from that room's spectator list.
    pub fn register_watcher(
        &self,
        connection: Uuid,
        room_id: Uuid,
        user_id: &str,
    ) -> Option<(Uuid, String)> {
        self.watchers
            .insert(connection, (room_id, user_id.to_string()))
    }

    pub fn unregister_watcher(&self, connection: Uuid) -> Option<(Uuid, String)> {
        self.watchers.remove(&connection).map(|(_, v)| v)
    }

    pub fn watched_room(&self, connection: Uuid) -> Option<Uuid> {
        self.watchers.get(&connection).map(|entry| entry.0)
    }

    /// Whether the user still spectates any room over any connection.
    pub fn user_watches_any(&self, user_id: &str) -> bool {
        self.watchers.iter().any(|entry| entry.value().1 == user_id)
    }

    /// Take a room out of the live set. Returns `None` when another caller
    /// already removed it; the winner also gets the membership and watcher
    /// indexes purged.
    pub fn remove(&self, room_id: Uuid) -> Option<Arc<Mutex<Room>>> {
        let (_, arc) = self.rooms.remove(&room_id)?;
        {
            let room = lock_room(&arc);
            for player in &room.players {
                self.members
                    .remove_if(&player.user_id, |_, mapped| *mapped == room_id);
            }
        }
        self.watchers.retain(|_, (mapped, _)| *mapped != room_id);
        Some(arc)
    }

    /// Rooms currently in play, for the spectator watch list.
    pub fn watch_list(&self) -> Vec<WatchRoomInfo> {
        self.rooms
            .iter()
            .filter_map(|entry| {
                let room = lock_room(entry.value());
                (room.state == GameState::Playing).then(|| WatchRoomInfo {
                    room_id: room.id,
                    player_names: room.player_names(),
                    scores: room.scores(),
                })
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
