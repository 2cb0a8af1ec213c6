use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Auth is via query param
/// ?token=..., resolved by the external identity service.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close code for a token the identity service rejected.
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=...
/// WebSocket upgrade endpoint. On auth failure, upgrades then immediately
/// closes with the close code. On success, spawns an actor for the
/// connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.identity.authenticate(&params.token).await {
        Some(identity) => {
            tracing::info!(
                user_id = %identity.user_id,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity))
        }
        None => {
            tracing::warn!(close_code = CLOSE_TOKEN_INVALID, "WebSocket auth failed");
            ws.on_upgrade(move |mut socket: WebSocket| async move {
                let close_frame = CloseFrame {
                    code: CLOSE_TOKEN_INVALID,
                    reason: "Token invalid".into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
