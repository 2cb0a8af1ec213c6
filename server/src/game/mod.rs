pub mod handlers;
pub mod invites;
pub mod manager;
pub mod queue;
pub mod room;
pub mod simulation;

use thiserror::Error;

use crate::services::ServiceError;

/// Failures surfaced to the client as `error` events. Precondition
/// violations and stale references are never fatal: the operation simply
/// has no effect.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("already queued, invited or playing")]
    AlreadyStartingGame,
    #[error("an invitation from you is still outstanding")]
    InvitePending,
    #[error("invitation is no longer available")]
    InviteUnavailable,
    #[error("players cannot invite themselves")]
    SelfInvite,
    #[error("event was sent on behalf of another user")]
    WrongSender,
    #[error("no live match for this player")]
    NotInMatch,
    #[error("room is gone")]
    RoomGone,
    #[error("match is not in the settings phase")]
    WrongPhase,
    #[error("waiting for the other player to choose settings")]
    NotSettingsSelector,
    #[error("player record unavailable: {0}")]
    Records(#[from] ServiceError),
}

/// The matchmaking structures. Queue and invitation directory change
/// together during pairing, so they live behind a single lock; that lock is
/// never held across an await point.
pub struct Matchmaking {
    pub queue: queue::MatchQueue,
    pub invites: invites::InviteDirectory,
}

impl Matchmaking {
    pub fn new() -> Self {
        Self {
            queue: queue::MatchQueue::new(),
            invites: invites::InviteDirectory::new(),
        }
    }

    /// Whether the user is queued or party to an open invitation. Room
    /// membership is checked separately by the room manager.
    pub fn involves(&self, user_id: &str) -> bool {
        self.queue.contains_user(user_id) || self.invites.involves(user_id)
    }
}

impl Default for Matchmaking {
    fn default() -> Self {
        Self::new()
    }
}
