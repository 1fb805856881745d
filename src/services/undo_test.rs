use super::*;
use serde_json::json;

fn uid_obj(uid: &str) -> ObjectState {
    json!({"uid": uid}).as_object().cloned().unwrap()
}

fn entry(uid: &str) -> UndoEntry {
    UndoEntry::added(0, uid_obj(uid))
}

#[test]
fn stack_evicts_oldest_not_newest() {
    let mut stack = UndoStack::with_capacity(3);
    for uid in ["a", "b", "c"] {
        assert!(stack.push(entry(uid)).is_none());
    }
    let evicted = stack.push(entry("d")).expect("eviction");
    assert_eq!(evicted.objects[0]["uid"], json!("a"));
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.pop().unwrap().objects[0]["uid"], json!("d"));
}

#[test]
fn depth_never_exceeds_capacity() {
    let undo = UndoManager::new();
    for n in 0..(UNDO_CAPACITY * 3) {
        undo.push(1, Some(0), entry(&format!("o{n}")));
        assert!(undo.depth(1, 0) <= UNDO_CAPACITY);
    }
    assert_eq!(undo.depth(1, 0), UNDO_CAPACITY);
}

#[test]
fn pop_returns_most_recent_first() {
    let undo = UndoManager::new();
    undo.push(1, Some(0), entry("first"));
    undo.push(1, Some(0), entry("second"));
    assert_eq!(undo.pop(1, 0).unwrap().objects[0]["uid"], json!("second"));
    assert_eq!(undo.pop(1, 0).unwrap().objects[0]["uid"], json!("first"));
    assert!(undo.pop(1, 0).is_none());
}

#[test]
fn pop_unknown_whiteboard_is_empty() {
    let undo = UndoManager::new();
    assert!(undo.pop(1, 42).is_none());
}

#[test]
fn push_without_whiteboard_is_noop() {
    let undo = UndoManager::new();
    undo.push(1, None, entry("x"));
    assert_eq!(undo.depth(1, 0), 0);
}

#[test]
fn stacks_are_isolated_per_room_and_whiteboard() {
    let undo = UndoManager::new();
    undo.push(1, Some(0), entry("r1w0"));
    undo.push(1, Some(1), entry("r1w1"));
    undo.push(2, Some(0), entry("r2w0"));

    assert_eq!(undo.pop(2, 0).unwrap().objects[0]["uid"], json!("r2w0"));
    assert_eq!(undo.depth(1, 0), 1);
    assert_eq!(undo.depth(1, 1), 1);
}

#[test]
fn discard_and_discard_room() {
    let undo = UndoManager::new();
    undo.push(1, Some(0), entry("a"));
    undo.push(1, Some(1), entry("b"));
    undo.push(2, Some(0), entry("c"));

    undo.discard(1, 0);
    assert_eq!(undo.depth(1, 0), 0);
    assert_eq!(undo.depth(1, 1), 1);

    undo.discard_room(1);
    assert_eq!(undo.depth(1, 1), 0);
    assert_eq!(undo.depth(2, 0), 1);
}
