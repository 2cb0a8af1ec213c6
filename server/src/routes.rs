use axum::{extract::Path, extract::State, Json, Router};

use crate::presence;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router.
///
/// The real surface of this server is the WebSocket endpoint; the REST
/// routes are a health check and a read-only presence probe.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new().route(
        "/api/status/{user_id}",
        axum::routing::get(user_status),
    );

    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// GET /api/status/{user_id} — presence tri-state for one user.
async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<serde_json::Value> {
    let status = presence::status_of(&state, &user_id);
    Json(serde_json::json!({
        "user_id": user_id,
        "status": status.as_str(),
    }))
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
