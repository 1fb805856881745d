use super::*;
use crate::services::whiteboard::Whiteboard;
use serde_json::json;

fn sample_export() -> WhiteboardExport {
    let mut wb = Whiteboard::new(3, "Quarterly");
    wb.put(
        "a",
        json!({"uid": "a", "type": "image", "fileId": 2, "src": "/x"})
            .as_object()
            .cloned()
            .unwrap(),
    );
    wb.put("b", json!({"uid": "b", "type": "rect"}).as_object().cloned().unwrap());
    wb.export()
}

#[tokio::test]
async fn save_then_load_returns_same_export() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());
    let export = sample_export();

    store.save(1, "Q3 review", &export).await.unwrap();
    let loaded = store.load(1, "Q3 review").await.unwrap();
    assert_eq!(loaded, export);
    assert!(dir.path().join("room-1").join("Q3 review.wml").exists());
}

#[tokio::test]
async fn saved_file_is_filtered_export() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());
    store.save(1, "deck", &sample_export()).await.unwrap();

    let text = std::fs::read_to_string(dir.path().join("room-1/deck.wml")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(value.get("id").is_none());
    assert!(value["roomItems"]["a"].get("src").is_none());
    assert_eq!(value["name"], json!("Quarterly"));
}

#[tokio::test]
async fn load_missing_snapshot_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());
    let err = store.load(1, "nope").await.unwrap_err();
    assert!(matches!(err, PersistenceError::NotFound(_)));
    assert_eq!(err.error_code(), "E_SNAPSHOT_NOT_FOUND");
}

#[tokio::test]
async fn path_traversal_names_are_neutralized() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());
    store.save(1, "../../etc/passwd", &sample_export()).await.unwrap();
    assert!(dir.path().join("room-1").join("______etc_passwd.wml").exists());
}

#[tokio::test]
async fn empty_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path());
    let err = store.save(1, "   ", &sample_export()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidName(_)));
    assert!(err.user_visible());
}

#[tokio::test]
async fn unwritable_root_fails_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let store = FileSnapshotStore::new(&blocker);
    let err = store.save(1, "deck", &sample_export()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::Io(_)));
}
