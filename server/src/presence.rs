//! Presence tracking and broadcast.
//!
//! In-memory presence store (DashMap) keyed by user id. A user's "playing"
//! flag is distinct from "online": it is set only while the user is an
//! active player or spectator inside a live room. Every status transition
//! is broadcast to all connected clients; peers' UI depends on this stream.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::ServerEvent;

/// The status a peer sees for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresenceStatus {
    Online,
    Playing,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Playing => "PLAYING",
            Self::Offline => "OFFLINE",
        }
    }
}

/// Info tracked per user in the presence map. Entries are kept after the
/// user goes offline so display names stay resolvable for invitations.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub display_name: String,
    pub online: bool,
    pub playing: bool,
}

impl PresenceEntry {
    fn status(&self) -> PresenceStatus {
        if !self.online {
            PresenceStatus::Offline
        } else if self.playing {
            PresenceStatus::Playing
        } else {
            PresenceStatus::Online
        }
    }
}

pub type PresenceMap = Arc<DashMap<String, PresenceEntry>>;

pub fn new_presence_map() -> PresenceMap {
    Arc::new(DashMap::new())
}

/// Current status of a user as peers see it.
pub fn status_of(state: &AppState, user_id: &str) -> PresenceStatus {
    state
        .presence
        .get(user_id)
        .map(|entry| entry.status())
        .unwrap_or(PresenceStatus::Offline)
}

pub fn display_name_of(state: &AppState, user_id: &str) -> Option<String> {
    state
        .presence
        .get(user_id)
        .map(|entry| entry.display_name.clone())
}

pub fn is_playing(state: &AppState, user_id: &str) -> bool {
    state
        .presence
        .get(user_id)
        .map(|entry| entry.playing)
        .unwrap_or(false)
}

/// Snapshot of all tracked users, for the initial feed of a new connection.
pub fn snapshot(state: &AppState) -> Vec<(String, PresenceStatus)> {
    state
        .presence
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().status()))
        .collect()
}

/// Mark a user online (first or additional connection). Broadcasts only
/// when the visible status actually changes.
pub fn note_online(state: &AppState, user_id: &str, display_name: &str) {
    update(state, user_id, |entry| {
        entry.display_name = display_name.to_string();
        entry.online = true;
    });
}

/// Mark a user offline (last connection gone). Also drops the playing flag.
pub fn note_offline(state: &AppState, user_id: &str) {
    update(state, user_id, |entry| {
        entry.online = false;
        entry.playing = false;
    });
}

/// Set the playing flag: the user entered a live room as player or spectator.
pub fn mark_playing(state: &AppState, user_id: &str) {
    update(state, user_id, |entry| entry.playing = true);
}

/// Clear the playing flag: the user left their last live room.
pub fn clear_playing(state: &AppState, user_id: &str) {
    update(state, user_id, |entry| entry.playing = false);
}

fn update(state: &AppState, user_id: &str, apply: impl FnOnce(&mut PresenceEntry)) {
    let mut entry = state
        .presence
        .entry(user_id.to_string())
        .or_insert_with(|| PresenceEntry {
            display_name: user_id.to_string(),
            online: false,
            playing: false,
        });
    let before = entry.status();
    apply(entry.value_mut());
    let after = entry.status();
    drop(entry);

    if before != after {
        tracing::debug!(user_id = %user_id, status = after.as_str(), "presence transition");
        broadcast_to_all(
            &state.connections,
            &ServerEvent::StatusUpdate {
                user_id: user_id.to_string(),
                status: after,
            },
        );
    }
}
