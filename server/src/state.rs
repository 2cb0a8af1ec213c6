use std::sync::{Arc, Mutex};

use crate::game::manager::RoomManager;
use crate::game::Matchmaking;
use crate::presence::{new_presence_map, PresenceMap};
use crate::services::{IdentityService, RecordService};
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Active WebSocket connections per user
    pub connections: ConnectionRegistry,
    /// In-memory presence tracking: user id -> entry
    pub presence: PresenceMap,
    /// Matchmaking queue + invitation directory behind one lock
    pub matchmaking: Arc<Mutex<Matchmaking>>,
    /// Live rooms
    pub rooms: Arc<RoomManager>,
    /// Identity/session collaborator
    pub identity: Arc<dyn IdentityService>,
    /// Persistence/record collaborator
    pub records: Arc<dyn RecordService>,
}

impl AppState {
    pub fn new(identity: Arc<dyn IdentityService>, records: Arc<dyn RecordService>) -> Self {
        Self {
            connections: new_connection_registry(),
            presence: new_presence_map(),
            matchmaking: Arc::new(Mutex::new(Matchmaking::new())),
            rooms: Arc::new(RoomManager::new()),
            identity,
            records,
        }
    }
}
