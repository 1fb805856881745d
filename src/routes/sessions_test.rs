use super::*;
use crate::state::test_helpers::{join, test_app_state};
use tokio::time::{Duration, timeout};

#[tokio::test]
async fn list_sessions_pages_in_requested_order() {
    let (state, _dir) = test_app_state();
    join(&state, 1, "carol", &[]).await;
    join(&state, 1, "alice", &[]).await;
    join(&state, 2, "bob", &[]).await;

    let q = PageQuery { start: Some(1), max: Some(1), order: Some("token".into()), asc: Some(true) };
    let Json(page) = list_sessions(State(state.clone()), Query(q)).await;
    assert_eq!(page.total, 3);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].token, "bob");
}

#[tokio::test]
async fn list_sessions_defaults_to_id_order() {
    let (state, _dir) = test_app_state();
    let (a, _) = join(&state, 1, "z", &[]).await;
    let (b, _) = join(&state, 1, "y", &[]).await;
    let Json(page) = list_sessions(State(state.clone()), Query(PageQuery::default())).await;
    let ids: Vec<SessionId> = page.records.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
}

#[tokio::test]
async fn av_update_creates_then_reuses_transport_session() {
    let (state, _dir) = test_app_state();
    let (primary, _rx) = join(&state, 4, "alice", &[Right::Audio]).await;

    let body = AvBody { recording: Some(true), publishing: None };
    let Json(transport) = update_av(State(state.clone()), Path(primary.id), Json(body)).await.unwrap();
    assert!(transport.is_transport());
    assert!(transport.recording);
    assert_eq!(transport.token, "alice");

    let body = AvBody { recording: None, publishing: Some(true) };
    let Json(again) = update_av(State(state.clone()), Path(primary.id), Json(body)).await.unwrap();
    assert_eq!(again.id, transport.id);
    assert!(again.recording && again.publishing);

    let Json(stats) = room_stats(State(state.clone()), Path(4)).await;
    assert_eq!(stats, RoomStats { sessions: 1, connections: 2, recording: 1, publishing: 1 });

    let Json(totals) = session_stats(State(state.clone())).await;
    assert_eq!(totals.sessions, 1);
    assert_eq!(totals.transport_sessions, 1);
}

#[tokio::test]
async fn av_update_for_unknown_session_is_not_found() {
    let (state, _dir) = test_app_state();
    let err = update_av(State(state), Path(77), Json(AvBody::default())).await.unwrap_err();
    assert_eq!(err, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rights_update_refreshes_client_role() {
    let (state, _dir) = test_app_state();
    let (session, mut rx) = join(&state, 1, "alice", &[]).await;

    let body = RightsBody { rights: vec!["presenter".into()] };
    let Json(updated) = update_rights(State(state.clone()), Path(session.id), Json(body)).await.unwrap();
    assert!(updated.has_right(Right::Presenter));

    let frame = timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("role frame timed out")
        .expect("channel closed");
    assert_eq!(frame.func(), Some(r#"WbArea.setRole("presenter");"#));
    assert!(state.registry.get(session.id).await.unwrap().has_right(Right::Presenter));
}

#[tokio::test]
async fn rights_update_rejects_unknown_right() {
    let (state, _dir) = test_app_state();
    let (session, _rx) = join(&state, 1, "alice", &[]).await;
    let body = RightsBody { rights: vec!["superuser".into()] };
    let err = update_rights(State(state), Path(session.id), Json(body)).await.unwrap_err();
    assert_eq!(err, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn active_rooms_lists_local_rooms_once() {
    let (state, _dir) = test_app_state();
    join(&state, 5, "a", &[]).await;
    join(&state, 5, "b", &[]).await;
    join(&state, 2, "c", &[]).await;
    let Json(rooms) = active_rooms(State(state.clone()), Query(ServerQuery::default())).await;
    assert_eq!(rooms, vec![2, 5]);

    let q = ServerQuery { server: Some("edge-1".into()) };
    let Json(rooms) = active_rooms(State(state), Query(q)).await;
    assert!(rooms.is_empty());
}

#[tokio::test]
async fn locate_reports_found_missing_and_ambiguous() {
    let (state, _dir) = test_app_state();
    join(&state, 1, "alice", &[]).await;

    let q = TokenQuery { token: "alice".into() };
    let Json(found) = locate_session(State(state.clone()), Query(q)).await.unwrap();
    assert_eq!(found.session.token, "alice");
    assert_eq!(found.server, None);

    let q = TokenQuery { token: "nobody".into() };
    assert_eq!(locate_session(State(state.clone()), Query(q)).await.unwrap_err(), StatusCode::NOT_FOUND);

    state
        .registry
        .add(Session::new("alice", Some(1)).with_server(Some("edge-1".into())))
        .await;
    let q = TokenQuery { token: "alice".into() };
    assert_eq!(locate_session(State(state), Query(q)).await.unwrap_err(), StatusCode::CONFLICT);
}
