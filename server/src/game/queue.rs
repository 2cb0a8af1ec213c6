//! Matchmaking queue: a FIFO pool of players waiting for a random opponent.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::ws::ConnectionHandle;

/// A player waiting to be paired. Holds the connection that joined the
/// queue; if that connection drops the entry is removed.
#[derive(Clone)]
pub struct QueuedPlayer {
    pub user_id: String,
    pub display_name: String,
    pub points: u32,
    pub connection: ConnectionHandle,
}

#[derive(Default)]
pub struct MatchQueue {
    waiting: VecDeque<QueuedPlayer>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, player: QueuedPlayer) {
        self.waiting.push_back(player);
    }

    /// Earliest-enqueued player with a different user id. FIFO pairing; a
    /// player is never matched with themselves.
    pub fn dequeue_opponent_for(&mut self, user_id: &str) -> Option<QueuedPlayer> {
        let pos = self.waiting.iter().position(|p| p.user_id != user_id)?;
        self.waiting.remove(pos)
    }

    /// Drop the entry that joined over this connection (cancel/disconnect).
    pub fn remove_connection(&mut self, connection: Uuid) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|p| p.connection.id != connection);
        self.waiting.len() < before
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.waiting.iter().any(|p| p.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(user_id: &str) -> QueuedPlayer {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        QueuedPlayer {
            user_id: user_id.to_string(),
            display_name: user_id.to_string(),
            points: 1000,
            connection: ConnectionHandle::new(tx),
        }
    }

    #[test]
    fn pairs_in_fifo_order() {
        let mut q = MatchQueue::new();
        q.enqueue(queued("alice"));
        q.enqueue(queued("bob"));
        let opponent = q.dequeue_opponent_for("carol").unwrap();
        assert_eq!(opponent.user_id, "alice");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn never_pairs_a_player_with_themselves() {
        let mut q = MatchQueue::new();
        q.enqueue(queued("alice"));
        assert!(q.dequeue_opponent_for("alice").is_none());
        assert!(q.contains_user("alice"));
        let opponent = q.dequeue_opponent_for("bob").unwrap();
        assert_eq!(opponent.user_id, "alice");
    }

    #[test]
    fn removal_by_connection() {
        let mut q = MatchQueue::new();
        let player = queued("alice");
        let conn = player.connection.id;
        q.enqueue(player);
        assert!(q.remove_connection(conn));
        assert!(!q.remove_connection(conn));
        assert!(q.is_empty());
    }
}
