pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// A live connection: a stable id plus the outbound sender. Game state keys
/// everything durable by user id and treats connections as disposable,
/// replaceable handles identified by this id.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }
}

/// Connection registry: tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs).
pub type ConnectionRegistry = Arc<DashMap<String, Vec<ConnectionHandle>>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}

/// Register a connection under the user's connection set.
pub fn register_connection(registry: &ConnectionRegistry, user_id: &str, handle: ConnectionHandle) {
    registry
        .entry(user_id.to_string())
        .or_default()
        .push(handle);

    let conn_count = registry.get(user_id).map(|v| v.len()).unwrap_or(0);
    tracing::debug!(
        user_id = %user_id,
        connections = conn_count,
        "Connection registered"
    );
}

/// Remove one connection from the registry. Returns false when the id was
/// already gone, which makes disconnect cleanup idempotent.
pub fn remove_connection(
    registry: &ConnectionRegistry,
    user_id: &str,
    connection_id: Uuid,
) -> bool {
    let mut removed = false;
    let mut remove_user = false;

    if let Some(mut connections) = registry.get_mut(user_id) {
        let before = connections.len();
        connections.retain(|handle| handle.id != connection_id && !handle.sender.is_closed());
        removed = connections.len() < before;
        if connections.is_empty() {
            remove_user = true;
        }
    }

    if remove_user {
        registry.remove(user_id);
    }

    removed
}

/// Look up one specific connection of a user.
pub fn find_connection(
    registry: &ConnectionRegistry,
    user_id: &str,
    connection_id: Uuid,
) -> Option<ConnectionHandle> {
    registry
        .get(user_id)?
        .iter()
        .find(|handle| handle.id == connection_id)
        .cloned()
}
