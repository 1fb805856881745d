//! WebSocket handler — one participant's whiteboard connection.
//!
//! DESIGN
//! ======
//! On upgrade the participant is registered as a primary session, its
//! outbound channel is attached to the broadcast hub, and the initial
//! whiteboard sync is sent. The connection then runs a `select!` loop:
//! - Incoming text → command envelope → action router
//! - Frames fanned out by room peers → forward to client
//!
//! The router owns all whiteboard semantics; this module only translates
//! between the socket and the router.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register session → attach channel → initial sync
//! 2. Client sends envelopes → router (broadcasts go out through the hub)
//! 3. Close → detach → remove participant → close room if it emptied

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::frame::Frame;
use crate::services::session::{Right, RoomId, Session, SessionId, generate_token};
use crate::state::AppState;

// =============================================================================
// CONNECT PARAMETERS
// =============================================================================

/// Query parameters of `/api/ws`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub room_id: RoomId,
    /// Identity token; generated when the client has none.
    pub token: Option<String>,
    pub rights: Vec<Right>,
    pub language_id: i64,
    pub user_name: String,
}

impl ConnectParams {
    /// Parse `room`, `uid`, `rights` (comma separated), `lang` and `name`.
    ///
    /// # Errors
    ///
    /// Returns a short reason when `room` or `lang` is missing or invalid.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, &'static str> {
        let room_id = params
            .get("room")
            .ok_or("room required")?
            .parse()
            .map_err(|_| "invalid room")?;
        let language_id = match params.get("lang") {
            Some(raw) => raw.parse().map_err(|_| "invalid lang")?,
            None => 1,
        };
        let rights = params
            .get("rights")
            .map(|raw| raw.split(',').filter_map(Right::parse).collect())
            .unwrap_or_default();
        Ok(Self {
            room_id,
            token: params.get("uid").filter(|t| !t.is_empty()).cloned(),
            rights,
            language_id,
            user_name: params.get("name").cloned().unwrap_or_default(),
        })
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = match ConnectParams::from_query(&params) {
        Ok(p) => p,
        Err(reason) => return (StatusCode::BAD_REQUEST, reason).into_response(),
    };
    ws.on_upgrade(move |socket| run_ws(socket, state, params))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, params: ConnectParams) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    let (session, initial) = connect(&state, params, client_tx).await;

    let mut open = true;
    for frame in &initial {
        if send_frame(&mut socket, frame).await.is_err() {
            open = false;
            break;
        }
    }

    while open {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, session.id, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect(&state, &session).await;
}

/// Register the participant, attach its channel and build the initial sync.
pub(crate) async fn connect(
    state: &AppState,
    params: ConnectParams,
    client_tx: mpsc::Sender<Frame>,
) -> (Session, Vec<Frame>) {
    let token = params.token.unwrap_or_else(generate_token);
    let session = state
        .registry
        .add(
            Session::new(token, Some(params.room_id))
                .with_server(state.config.server_id.clone())
                .with_rights(params.rights)
                .with_language(params.language_id)
                .with_user_name(params.user_name),
        )
        .await;
    state.hub.attach(session.id, client_tx).await;
    let initial = state.router.initial_sync(&session).await;
    info!(session_id = session.id, room_id = params.room_id, token = %session.token, "ws: client connected");
    (session, initial)
}

/// Handle one inbound text message with the session's current rights.
pub(crate) async fn process_inbound_text(state: &AppState, session_id: SessionId, text: &str) -> Vec<Frame> {
    let Some(session) = state.registry.get(session_id).await else {
        warn!(session_id, "ws: message from unregistered session");
        return Vec::new();
    };
    state.router.dispatch_text(&session, text).await
}

/// Detach the participant and close its room once no primary session remains.
pub(crate) async fn disconnect(state: &AppState, session: &Session) {
    state.hub.detach(session.id).await;
    let removed = state.registry.remove_participant(session.id).await;
    info!(session_id = session.id, removed = removed.len(), "ws: client disconnected");

    let Some(room_id) = session.room_id else {
        return;
    };
    if state.config.close_empty_rooms {
        let registry = &state.registry;
        state
            .router
            .close_room_if(room_id, || async move { registry.list_by_room(room_id).await.is_empty() })
            .await;
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if let Frame::Error { message } = frame {
        warn!(message = %message, "ws: send error frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
