use super::*;
use crate::frame::WbMethod;
use crate::services::session::Right;
use serde_json::json;
use tokio::time::{Duration, timeout};

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

async fn join(
    registry: &SessionRegistry,
    hub: &BroadcastHub,
    token: &str,
    room: RoomId,
    capacity: usize,
) -> (Session, mpsc::Receiver<Frame>) {
    let session = registry
        .add(Session::new(token, Some(room)).with_rights([Right::Whiteboard]))
        .await;
    let (tx, rx) = mpsc::channel(capacity);
    hub.attach(session.id, tx).await;
    (session, rx)
}

fn call() -> WbCall {
    WbCall::new(WbMethod::ClearAll, json!({"wbId": 0}))
}

#[tokio::test]
async fn send_all_reaches_originator_and_peers() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (_a, mut rx_a) = join(&registry, &hub, "a", 1, 8).await;
    let (_b, mut rx_b) = join(&registry, &hub, "b", 1, 8).await;

    assert_eq!(hub.send_all(1, &call()).await, 2);
    let frame = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(frame.func(), Some(r#"WbArea.clearAll({"wbId":0});"#));
    assert_channel_has_frame(&mut rx_b).await;
}

#[tokio::test]
async fn send_others_skips_every_session_of_originator() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (_a1, mut rx_a1) = join(&registry, &hub, "a", 1, 8).await;
    let (_a2, mut rx_a2) = join(&registry, &hub, "a", 1, 8).await;
    let (_b, mut rx_b) = join(&registry, &hub, "b", 1, 8).await;

    assert_eq!(hub.send_others(1, "a", &call()).await, 1);
    assert_channel_has_frame(&mut rx_b).await;
    assert_channel_empty(&mut rx_a1).await;
    assert_channel_empty(&mut rx_a2).await;
}

#[tokio::test]
async fn send_is_room_scoped() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (_a, mut rx_a) = join(&registry, &hub, "a", 1, 8).await;
    let (_b, mut rx_b) = join(&registry, &hub, "b", 2, 8).await;

    hub.send_all(2, &call()).await;
    assert_channel_has_frame(&mut rx_b).await;
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn transform_personalizes_each_recipient() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (_a, mut rx_a) = join(&registry, &hub, "alice", 1, 8).await;
    let (_b, mut rx_b) = join(&registry, &hub, "bob", 1, 8).await;

    hub.send(1, &call(), None, |c, s| {
        Frame::wb(&WbCall::new(c.method, json!({"for": s.token})))
    })
    .await;

    let a = assert_channel_has_frame(&mut rx_a).await;
    let b = assert_channel_has_frame(&mut rx_b).await;
    assert!(a.func().unwrap().contains("alice"));
    assert!(b.func().unwrap().contains("bob"));
}

#[tokio::test]
async fn full_or_closed_channel_does_not_stop_other_deliveries() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (_full, mut rx_full) = join(&registry, &hub, "full", 1, 1).await;
    let (_gone, rx_gone) = join(&registry, &hub, "gone", 1, 8).await;
    let (_ok, mut rx_ok) = join(&registry, &hub, "ok", 1, 8).await;
    drop(rx_gone);

    assert_eq!(hub.send_all(1, &call()).await, 2);
    // Second round: "full" has no capacity left, "gone" is closed.
    assert_eq!(hub.send_all(1, &call()).await, 1);

    assert_channel_has_frame(&mut rx_ok).await;
    assert_channel_has_frame(&mut rx_ok).await;
    assert_channel_has_frame(&mut rx_full).await;
    assert_channel_empty(&mut rx_full).await;
}

#[tokio::test]
async fn detached_sessions_are_skipped() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (a, mut rx_a) = join(&registry, &hub, "a", 1, 8).await;
    assert!(hub.detach(a.id).await);
    assert!(!hub.detach(a.id).await);

    assert_eq!(hub.send_all(1, &call()).await, 0);
    assert!(!hub.send_to(a.id, Frame::error("x")).await);
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn send_to_audience_others_matches_send_others() {
    let registry = Arc::new(SessionRegistry::new());
    let hub = BroadcastHub::new(registry.clone());
    let (_a, mut rx_a) = join(&registry, &hub, "a", 1, 8).await;
    let (_b, mut rx_b) = join(&registry, &hub, "b", 1, 8).await;

    let sent = hub
        .send_to_audience(1, &call(), &Audience::Others("a".into()), |c, _| Frame::wb(c))
        .await;
    assert_eq!(sent, 1);
    assert_channel_has_frame(&mut rx_b).await;
    assert_channel_empty(&mut rx_a).await;
}
