//! Invitation directory: pending host-to-guest match requests.
//!
//! At most one outstanding invitation per host at any time. A guest may be
//! invited by any number of distinct hosts simultaneously; invitations
//! survive the guest going offline so they can be resurfaced on reconnect.

use std::collections::HashMap;
use uuid::Uuid;

/// A pending, unaccepted request from `host_id` to play against `guest_id`.
/// Tied to the host connection that sent it: when that connection drops,
/// the invitation is implicitly cancelled.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub host_id: String,
    pub guest_id: String,
    pub host_connection: Uuid,
}

#[derive(Debug, Default)]
pub struct InviteDirectory {
    by_host: HashMap<String, Invitation>,
}

impl InviteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new invitation. Returns false (and mutates nothing) when
    /// the host already has one outstanding.
    pub fn invite(&mut self, host_id: &str, guest_id: &str, host_connection: Uuid) -> bool {
        if self.by_host.contains_key(host_id) {
            return false;
        }
        self.by_host.insert(
            host_id.to_string(),
            Invitation {
                host_id: host_id.to_string(),
                guest_id: guest_id.to_string(),
                host_connection,
            },
        );
        true
    }

    /// Withdraw the host's invitation, returning it if one existed.
    pub fn cancel(&mut self, host_id: &str) -> Option<Invitation> {
        self.by_host.remove(host_id)
    }

    pub fn find_by_host(&self, host_id: &str) -> Option<&Invitation> {
        self.by_host.get(host_id)
    }

    /// Hosts with an open invitation naming this guest. Used to resurface
    /// invites when the guest connects or re-subscribes.
    pub fn hosts_inviting(&self, guest_id: &str) -> Vec<String> {
        self.by_host
            .values()
            .filter(|inv| inv.guest_id == guest_id)
            .map(|inv| inv.host_id.clone())
            .collect()
    }

    /// Whether the user is a party (host or guest) to any open invitation.
    pub fn involves(&self, user_id: &str) -> bool {
        self.by_host.contains_key(user_id)
            || self.by_host.values().any(|inv| inv.guest_id == user_id)
    }

    /// Drop the invitation authored over this connection (host disconnect).
    pub fn cancel_by_connection(&mut self, connection: Uuid) -> Option<Invitation> {
        let host = self
            .by_host
            .values()
            .find(|inv| inv.host_connection == connection)
            .map(|inv| inv.host_id.clone())?;
        self.by_host.remove(&host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_invite_from_same_host_is_rejected() {
        let mut dir = InviteDirectory::new();
        let conn = Uuid::new_v4();
        assert!(dir.invite("alice", "bob", conn));
        assert!(!dir.invite("alice", "carol", conn));
        // The original invitation is untouched.
        assert_eq!(dir.find_by_host("alice").unwrap().guest_id, "bob");
    }

    #[test]
    fn cancel_then_reinvite_succeeds() {
        let mut dir = InviteDirectory::new();
        let conn = Uuid::new_v4();
        assert!(dir.invite("alice", "bob", conn));
        assert!(dir.cancel("alice").is_some());
        assert!(dir.cancel("alice").is_none());
        assert!(dir.invite("alice", "carol", conn));
    }

    #[test]
    fn guest_may_be_invited_by_many_hosts() {
        let mut dir = InviteDirectory::new();
        dir.invite("alice", "carol", Uuid::new_v4());
        dir.invite("bob", "carol", Uuid::new_v4());
        let mut hosts = dir.hosts_inviting("carol");
        hosts.sort();
        assert_eq!(hosts, vec!["alice", "bob"]);
        assert!(dir.involves("carol"));
        assert!(dir.involves("alice"));
        assert!(!dir.involves("dave"));
    }

    #[test]
    fn host_disconnect_cancels_by_connection() {
        let mut dir = InviteDirectory::new();
        let conn = Uuid::new_v4();
        dir.invite("alice", "bob", conn);
        let dropped = dir.cancel_by_connection(conn).unwrap();
        assert_eq!(dropped.guest_id, "bob");
        assert!(dir.cancel_by_connection(conn).is_none());
        assert!(!dir.involves("alice"));
    }
}
