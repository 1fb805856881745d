//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the whiteboard websocket endpoint and the session administration
//! routes under a single Axum router.

pub mod sessions;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/stats", get(sessions::session_stats))
        .route("/api/sessions/locate", get(sessions::locate_session))
        .route("/api/sessions/{id}/av", post(sessions::update_av))
        .route("/api/sessions/{id}/rights", patch(sessions::update_rights))
        .route("/api/rooms/{id}/stats", get(sessions::room_stats))
        .route("/api/servers/active-rooms", get(sessions::active_rooms))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
