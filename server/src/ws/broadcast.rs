use axum::extract::ws::Message;

use super::{ConnectionRegistry, ConnectionSender};
use crate::ws::protocol::ServerEvent;

/// Serialize an event and push it onto one connection's outbound channel.
pub fn send_event(sender: &ConnectionSender, event: &ServerEvent) {
    let Ok(text) = serde_json::to_string(event) else {
        return;
    };
    let _ = sender.send(Message::Text(text.into()));
}

/// Send an event to a specific user (all their connections).
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &ServerEvent) {
    let Ok(text) = serde_json::to_string(event) else {
        return;
    };
    if let Some(connections) = registry.get(user_id) {
        for handle in connections.value().iter() {
            let _ = handle.sender.send(Message::Text(text.clone().into()));
        }
    }
}

/// Broadcast an event to every connected client.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &ServerEvent) {
    let Ok(text) = serde_json::to_string(event) else {
        return;
    };
    for entry in registry.iter() {
        for handle in entry.value().iter() {
            let _ = handle.sender.send(Message::Text(text.clone().into()));
        }
    }
}
