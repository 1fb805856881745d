use super::*;
use crate::config::Config;
use crate::state::test_helpers::{join, test_app_state};
use serde_json::json;
use tokio::time::{Duration, timeout};

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn params(room_id: RoomId, token: &str, rights: Vec<Right>) -> ConnectParams {
    ConnectParams { room_id, token: Some(token.into()), rights, language_id: 1, user_name: String::new() }
}

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

// =============================================================================
// ConnectParams
// =============================================================================

#[test]
fn from_query_parses_all_fields() {
    let p = ConnectParams::from_query(&query(&[
        ("room", "7"),
        ("uid", "tok"),
        ("rights", "presenter,whiteBoard,bogus"),
        ("lang", "4"),
        ("name", "Ada"),
    ]))
    .unwrap();
    assert_eq!(p.room_id, 7);
    assert_eq!(p.token.as_deref(), Some("tok"));
    assert_eq!(p.rights, vec![Right::Presenter, Right::Whiteboard]);
    assert_eq!(p.language_id, 4);
    assert_eq!(p.user_name, "Ada");
}

#[test]
fn from_query_defaults_optional_fields() {
    let p = ConnectParams::from_query(&query(&[("room", "1"), ("uid", "")])).unwrap();
    assert_eq!(p.token, None);
    assert!(p.rights.is_empty());
    assert_eq!(p.language_id, 1);
}

#[test]
fn from_query_rejects_missing_or_bad_room() {
    assert_eq!(ConnectParams::from_query(&query(&[])), Err("room required"));
    assert_eq!(ConnectParams::from_query(&query(&[("room", "x")])), Err("invalid room"));
    assert_eq!(ConnectParams::from_query(&query(&[("room", "1"), ("lang", "fr")])), Err("invalid lang"));
}

// =============================================================================
// connect / inbound / disconnect
// =============================================================================

#[tokio::test]
async fn connect_registers_session_and_returns_initial_sync() {
    let (state, _dir) = test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let (session, frames) = connect(&state, params(3, "alice", vec![Right::Presenter]), tx).await;

    assert_eq!(state.registry.get(session.id).await.as_ref(), Some(&session));
    assert_eq!(frames.first().and_then(Frame::func), Some("WbArea.init();"));
    assert_eq!(frames.last().and_then(Frame::func), Some(r#"WbArea.setRole("presenter");"#));
    assert_eq!(state.store.room_ids().await, vec![3]);
}

#[tokio::test]
async fn connect_generates_token_when_missing() {
    let (state, _dir) = test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let mut p = params(1, "", vec![]);
    p.token = None;
    let (session, _) = connect(&state, p, tx).await;
    assert_eq!(session.token.len(), 32);
}

#[tokio::test]
async fn inbound_text_uses_current_rights() {
    let (state, _dir) = test_app_state();
    let (tx, _rx) = mpsc::channel(8);
    let (session, _) = connect(&state, params(1, "alice", vec![]), tx).await;
    let (_peer, mut rx_peer) = join(&state, 1, "bob", &[]).await;

    let create = json!({"action": "createObj", "obj": {"wbId": 0, "obj": {"uid": "a", "type": "rect"}}}).to_string();
    process_inbound_text(&state, session.id, &create).await;
    assert!(timeout(Duration::from_millis(80), rx_peer.recv()).await.is_err());

    let mut granted = session.clone();
    granted.rights.insert(Right::Whiteboard);
    assert!(state.registry.update(&granted).await);

    process_inbound_text(&state, session.id, &create).await;
    let frame = assert_channel_has_frame(&mut rx_peer).await;
    assert!(frame.func().unwrap().starts_with("WbArea.createObj("));
}

#[tokio::test]
async fn inbound_text_from_unknown_session_is_dropped() {
    let (state, _dir) = test_app_state();
    let frames = process_inbound_text(&state, 999, r#"{"action":"createWb","obj":{}}"#).await;
    assert!(frames.is_empty());
    assert!(state.store.room_ids().await.is_empty());
}

#[tokio::test]
async fn last_disconnect_closes_room() {
    let (state, _dir) = test_app_state();
    let (tx_a, _rx_a) = mpsc::channel(8);
    let (tx_b, _rx_b) = mpsc::channel(8);
    let (a, _) = connect(&state, params(1, "alice", vec![Right::Presenter]), tx_a).await;
    let (b, _) = connect(&state, params(1, "bob", vec![]), tx_b).await;

    disconnect(&state, &a).await;
    assert_eq!(state.store.room_ids().await, vec![1]);
    assert!(state.registry.get(a.id).await.is_none());

    disconnect(&state, &b).await;
    assert!(state.store.room_ids().await.is_empty());
}

#[tokio::test]
async fn rooms_stay_open_when_closing_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config { close_empty_rooms: false, snapshot_dir: dir.path().to_path_buf(), ..Config::default() };
    let state = AppState::new(config);
    let (tx, _rx) = mpsc::channel(8);
    let (a, _) = connect(&state, params(1, "alice", vec![]), tx).await;

    disconnect(&state, &a).await;
    assert_eq!(state.store.room_ids().await, vec![1]);
}
