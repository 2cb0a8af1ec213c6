//! Wire protocol: named events with JSON payloads over the WebSocket.
//!
//! Inbound and outbound events are internally tagged enums; an undecodable
//! frame earns the sender an `error` event and is otherwise ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::handlers::{self, SessionCtx};
use crate::game::manager::WatchRoomInfo;
use crate::game::simulation::{Ball, Difficulty, MatchSetting};
use crate::presence::PresenceStatus;
use crate::state::AppState;
use crate::ws::broadcast::send_event;

/// Client -> server events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinQueue,
    CancelQueue,
    Invite {
        guest_id: String,
        host_id: String,
    },
    CancelInvite {
        host_id: String,
    },
    DenyInvite {
        host_id: String,
    },
    AcceptInvite {
        guest_id: String,
        host_id: String,
    },
    /// Client-sent scores are accepted on the wire but ignored: scores are
    /// server-authoritative.
    ConfirmSettings {
        difficulty: Difficulty,
        target_score: u32,
        #[serde(default)]
        player1_score: Option<u32>,
        #[serde(default)]
        player2_score: Option<u32>,
    },
    PaddleMove {
        delta: f32,
    },
    WatchRoom {
        room_id: Uuid,
    },
    WatchFriend {
        friend_id: String,
    },
    CancelMatch,
    GetWatchList,
    GetUserStatus {
        user_id: String,
    },
    GetInvitedList {
        user_id: String,
    },
}

/// Server -> client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    StatusUpdate {
        user_id: String,
        status: PresenceStatus,
    },
    InviteReceived {
        host_id: String,
        host_name: String,
    },
    InviteCancelled {
        host_id: String,
    },
    InviteDenied,
    SelectSettings {
        player_names: [String; 2],
    },
    StandBy {
        player_names: [String; 2],
    },
    MatchStarted {
        settings: MatchSetting,
    },
    StateUpdate {
        paddle1: f32,
        paddle2: f32,
        ball: Ball,
    },
    ScoreUpdate {
        score1: u32,
        score2: u32,
    },
    MatchFinished {
        /// Personalized: positive for the winner, negative for the loser,
        /// absent for spectators.
        point_delta: Option<i64>,
        summary: MatchSummary,
    },
    MatchCancelled,
    WatchList {
        rooms: Vec<WatchRoomInfo>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub winner_id: String,
    pub winner_name: String,
    pub loser_id: String,
    pub loser_name: String,
    pub winner_score: u32,
    pub loser_score: u32,
    pub finished_at: DateTime<Utc>,
}

/// Decode one inbound text frame and dispatch it to the session handlers.
pub async fn handle_text_message(text: &str, state: &AppState, ctx: &SessionCtx) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %ctx.user_id,
                error = %e,
                "Undecodable client event"
            );
            send_event(
                &ctx.connection.sender,
                &ServerEvent::Error {
                    message: "invalid event".to_string(),
                },
            );
            return;
        }
    };

    match event {
        ClientEvent::JoinQueue => handlers::join_queue(state, ctx).await,
        ClientEvent::CancelQueue => handlers::cancel_queue(state, ctx),
        ClientEvent::Invite { guest_id, host_id } => {
            handlers::invite(state, ctx, &host_id, &guest_id)
        }
        ClientEvent::CancelInvite { host_id } => handlers::cancel_invite(state, ctx, &host_id),
        ClientEvent::DenyInvite { host_id } => handlers::deny_invite(state, ctx, &host_id),
        ClientEvent::AcceptInvite { guest_id, host_id } => {
            handlers::accept_invite(state, ctx, &host_id, &guest_id).await
        }
        ClientEvent::ConfirmSettings {
            difficulty,
            target_score,
            ..
        } => handlers::confirm_settings(
            state,
            ctx,
            MatchSetting {
                difficulty,
                target_score,
            },
        ),
        ClientEvent::PaddleMove { delta } => handlers::paddle_move(state, ctx, delta),
        ClientEvent::WatchRoom { room_id } => handlers::watch_room(state, ctx, room_id),
        ClientEvent::WatchFriend { friend_id } => handlers::watch_friend(state, ctx, &friend_id),
        ClientEvent::CancelMatch => handlers::cancel_match(state, ctx),
        ClientEvent::GetWatchList => handlers::watch_list(state, ctx),
        ClientEvent::GetUserStatus { user_id } => handlers::user_status(state, ctx, &user_id),
        ClientEvent::GetInvitedList { user_id } => handlers::invited_list(state, ctx, &user_id),
    }
}
