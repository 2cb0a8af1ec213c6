//! External collaborator seams.
//!
//! The session core never authenticates users or persists match results
//! itself: identity lives in the platform's session service and durable
//! records in its persistence service. Both are reached through these
//! traits. `LocalRoster` is the in-memory implementation backing the dev
//! binary and the test suite.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

pub type MatchId = Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("unknown user {0}")]
    UnknownUser(String),
}

/// A verified identity attached to one WebSocket connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Identity/session service: resolves connection tokens and tracks the
/// platform-wide online flag.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<Identity>;
    async fn is_online(&self, user_id: &str) -> bool;
    async fn set_online(&self, user_id: &str);
    async fn set_offline(&self, user_id: &str);
}

/// Persistence/record service: durable match results and player points.
#[async_trait]
pub trait RecordService: Send + Sync {
    /// Current rating points for a player.
    async fn load_points(&self, user_id: &str) -> Result<u32, ServiceError>;

    /// Durably record a completed match. Called exactly once per finished
    /// match, from a detached task that never blocks gameplay.
    async fn record_match(
        &self,
        winner_id: &str,
        loser_id: &str,
        winner_score: u32,
        loser_score: u32,
    ) -> Result<MatchId, ServiceError>;

    async fn apply_rating_delta(&self, user_id: &str, delta: i64) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
pub struct RecordedMatch {
    pub id: MatchId,
    pub winner_id: String,
    pub loser_id: String,
    pub winner_score: u32,
    pub loser_score: u32,
}

/// In-memory roster standing in for both collaborators.
///
/// Tokens map to identities; in permissive mode an unknown token of the
/// form `user:Display Name` self-registers with default points, which is
/// what the dev binary runs with.
pub struct LocalRoster {
    tokens: DashMap<String, Identity>,
    points: DashMap<String, u32>,
    online: DashMap<String, ()>,
    matches: Mutex<Vec<RecordedMatch>>,
    permissive: bool,
}

impl LocalRoster {
    pub const DEFAULT_POINTS: u32 = 1000;

    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            points: DashMap::new(),
            online: DashMap::new(),
            matches: Mutex::new(Vec::new()),
            permissive: false,
        }
    }

    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::new()
        }
    }

    pub fn register(&self, token: &str, user_id: &str, display_name: &str, points: u32) {
        self.tokens.insert(
            token.to_string(),
            Identity {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
            },
        );
        self.points.insert(user_id.to_string(), points);
    }

    pub fn points_of(&self, user_id: &str) -> Option<u32> {
        self.points.get(user_id).map(|p| *p)
    }

    pub fn recorded_matches(&self) -> Vec<RecordedMatch> {
        self.matches.lock().expect("matches lock poisoned").clone()
    }
}

impl Default for LocalRoster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for LocalRoster {
    async fn authenticate(&self, token: &str) -> Option<Identity> {
        if let Some(identity) = self.tokens.get(token) {
            return Some(identity.clone());
        }
        if self.permissive {
            let (user_id, display_name) = token.split_once(':')?;
            if user_id.is_empty() || display_name.is_empty() {
                return None;
            }
            self.register(token, user_id, display_name, Self::DEFAULT_POINTS);
            return Some(Identity {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
            });
        }
        None
    }

    async fn is_online(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }

    async fn set_online(&self, user_id: &str) {
        self.online.insert(user_id.to_string(), ());
    }

    async fn set_offline(&self, user_id: &str) {
        self.online.remove(user_id);
    }
}

#[async_trait]
impl RecordService for LocalRoster {
    async fn load_points(&self, user_id: &str) -> Result<u32, ServiceError> {
        self.points
            .get(user_id)
            .map(|p| *p)
            .ok_or_else(|| ServiceError::UnknownUser(user_id.to_string()))
    }

    async fn record_match(
        &self,
        winner_id: &str,
        loser_id: &str,
        winner_score: u32,
        loser_score: u32,
    ) -> Result<MatchId, ServiceError> {
        let record = RecordedMatch {
            id: Uuid::new_v4(),
            winner_id: winner_id.to_string(),
            loser_id: loser_id.to_string(),
            winner_score,
            loser_score,
        };
        let id = record.id;
        self.matches
            .lock()
            .expect("matches lock poisoned")
            .push(record);
        Ok(id)
    }

    async fn apply_rating_delta(&self, user_id: &str, delta: i64) -> Result<(), ServiceError> {
        let mut entry = self
            .points
            .entry(user_id.to_string())
            .or_insert(Self::DEFAULT_POINTS);
        *entry = (*entry as i64 + delta).max(0) as u32;
        Ok(())
    }
}
