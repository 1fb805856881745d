//! Session administration and statistics routes.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::services::action::role_frame;
use crate::services::session::{
    Right, RoomId, SearchResult, ServerId, Session, SessionId, SessionOrder, SessionStatistics, TokenLookup,
};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub start: Option<usize>,
    pub max: Option<usize>,
    pub order: Option<String>,
    pub asc: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerQuery {
    pub server: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenLocation {
    pub server: Option<ServerId>,
    pub session: Session,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub sessions: usize,
    /// Sessions including audio/video sub-sessions.
    pub connections: usize,
    pub recording: usize,
    pub publishing: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct AvBody {
    pub recording: Option<bool>,
    pub publishing: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RightsBody {
    pub rights: Vec<String>,
}

/// `GET /api/sessions` — page over every session.
pub async fn list_sessions(State(state): State<AppState>, Query(q): Query<PageQuery>) -> Json<SearchResult> {
    let order = q.order.as_deref().map(SessionOrder::parse).unwrap_or_default();
    let page = state
        .registry
        .page(q.start.unwrap_or(0), q.max.unwrap_or(DEFAULT_PAGE_SIZE), order, q.asc.unwrap_or(true))
        .await;
    Json(page)
}

/// `GET /api/sessions/stats` — totals across servers.
pub async fn session_stats(State(state): State<AppState>) -> Json<SessionStatistics> {
    Json(state.registry.statistics().await)
}

/// `GET /api/rooms/:id/stats` — participants and AV counts of one room.
pub async fn room_stats(State(state): State<AppState>, Path(room_id): Path<RoomId>) -> Json<RoomStats> {
    Json(RoomStats {
        sessions: state.registry.list_by_room(room_id).await.len(),
        connections: state
            .registry
            .list_by_room_including_transient(room_id)
            .await
            .len(),
        recording: state.registry.count_recording(room_id).await,
        publishing: state.registry.count_publishing(room_id).await,
    })
}

/// `GET /api/servers/active-rooms` — rooms populated on a server.
pub async fn active_rooms(State(state): State<AppState>, Query(q): Query<ServerQuery>) -> Json<Vec<RoomId>> {
    let server = q.server.filter(|s| !s.is_empty());
    Json(state.registry.active_room_ids(server.as_deref()).await)
}

/// `GET /api/sessions/locate?token=` — find a participant on any server.
/// A token live on several servers is a conflict, not a guess.
pub async fn locate_session(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<TokenLocation>, StatusCode> {
    match state.registry.get_by_token_any_server(&q.token).await {
        TokenLookup::Found { session, server } => Ok(Json(TokenLocation { server, session })),
        TokenLookup::NotFound => Err(StatusCode::NOT_FOUND),
        TokenLookup::Ambiguous { .. } => Err(StatusCode::CONFLICT),
    }
}

/// `POST /api/sessions/:id/av` — register or update the participant's
/// audio/video sub-session.
pub async fn update_av(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<AvBody>,
) -> Result<Json<Session>, StatusCode> {
    let primary = state
        .registry
        .get(session_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    if primary.is_transport() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let existing = state
        .registry
        .all()
        .await
        .into_iter()
        .find(|s| s.token == primary.token && s.is_transport());
    let transport = match existing {
        Some(t) => t,
        None => state.registry.add(Session::transport_of(&primary)).await,
    };

    let mut updated = primary;
    updated.recording = body.recording.unwrap_or(updated.recording);
    updated.publishing = body.publishing.unwrap_or(updated.publishing);
    state.registry.update(&updated).await;

    let transport = state
        .registry
        .get(transport.id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    info!(session_id, transport_id = transport.id, recording = transport.recording, publishing = transport.publishing, "av session updated");
    Ok(Json(transport))
}

/// `PATCH /api/sessions/:id/rights` — replace rights and refresh the client role.
pub async fn update_rights(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<RightsBody>,
) -> Result<Json<Session>, StatusCode> {
    let rights = parse_rights(&body.rights).ok_or(StatusCode::BAD_REQUEST)?;
    let mut session = state
        .registry
        .get(session_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    session.rights = rights;

    if state.registry.update(&session).await {
        let role = role_frame(&session);
        for peer in state.registry.all().await {
            if peer.token == session.token && !peer.is_transport() {
                state.hub.send_to(peer.id, role.clone()).await;
            }
        }
    }
    Ok(Json(session))
}

fn parse_rights(raw: &[String]) -> Option<BTreeSet<Right>> {
    raw.iter().map(|r| Right::parse(r)).collect()
}

#[cfg(test)]
#[path = "sessions_test.rs"]
mod tests;
