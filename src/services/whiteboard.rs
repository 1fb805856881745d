//! Whiteboard store — per-room canvases and their ordered object maps.
//!
//! DESIGN
//! ======
//! The store maps room id -> `RoomHandle` (`Arc<Mutex<RoomWhiteboards>>`).
//! The outer map lock is held only to find or insert a room; every read or
//! mutation of a room happens under that room's own mutex, so rooms never
//! contend with each other. Snapshots (`export`, `objects`, `list`) are deep
//! copies taken under the room lock, so callers can iterate or serialize
//! them while other sessions keep mutating the live map.
//!
//! Object maps are `IndexMap`s: insertion order is the redraw/export order,
//! replacing an existing uid keeps its slot, removal shifts (never swaps).
//!
//! INVARIANTS
//! ==========
//! - Whiteboard ids are unique per room and never reused while it is open.
//! - `get_or_create` and `list` never hand out an empty container.
//! - The active pointer is set by callers; removing the active whiteboard
//!   leaves it dangling until the caller picks a new one.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::services::now_ms;
use crate::services::session::RoomId;

pub type WhiteboardId = i64;

/// One drawable object as sent by clients (`uid`, `type`, `slide`, geometry...).
pub type ObjectState = Map<String, Value>;

pub type RoomHandle = Arc<Mutex<RoomWhiteboards>>;

/// Resolved-URL fields that are recipient-specific and never persisted.
pub const RESOLVED_URL_FIELDS: &[&str] = &["_src", "src", "_poster"];

/// Localized label for default whiteboard names.
#[must_use]
pub fn default_label(language_id: i64) -> &'static str {
    match language_id {
        3 => "Tableau blanc",
        4 => "Lavagna",
        6 => "Pizarra",
        7 => "Доска",
        // 1 = English, 2 = German; both use the English word.
        _ => "Whiteboard",
    }
}

/// Object uid, if present and a string.
#[must_use]
pub fn object_uid(obj: &ObjectState) -> Option<&str> {
    obj.get("uid").and_then(Value::as_str)
}

/// Slide index of an object, `-1` when absent.
#[must_use]
pub fn object_slide(obj: &ObjectState) -> i64 {
    obj.get("slide").and_then(Value::as_i64).unwrap_or(-1)
}

// =============================================================================
// WHITEBOARD
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Whiteboard {
    pub id: WhiteboardId,
    pub name: String,
    /// Milliseconds since Unix epoch.
    pub created: i64,
    pub x: i32,
    pub y: i32,
    pub zoom: i32,
    pub full_fit: bool,
    pub slide: i32,
    objects: IndexMap<String, ObjectState>,
}

impl Whiteboard {
    pub fn new(id: WhiteboardId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created: now_ms(),
            x: 0,
            y: 0,
            zoom: 100,
            full_fit: true,
            slide: 0,
            objects: IndexMap::new(),
        }
    }

    /// Insert or replace an object. A replaced object keeps its position.
    pub fn put(&mut self, uid: impl Into<String>, state: ObjectState) -> Option<ObjectState> {
        self.objects.insert(uid.into(), state)
    }

    #[must_use]
    pub fn get(&self, uid: &str) -> Option<&ObjectState> {
        self.objects.get(uid)
    }

    pub fn remove(&mut self, uid: &str) -> Option<ObjectState> {
        self.objects.shift_remove(uid)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ObjectState)> {
        self.objects.iter()
    }

    /// Deep copy of all objects in order.
    #[must_use]
    pub fn objects(&self) -> Vec<ObjectState> {
        self.objects.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove every object on `slide`, returning them in map order.
    pub fn remove_slide(&mut self, slide: i64) -> Vec<ObjectState> {
        let mut removed = Vec::new();
        self.objects.retain(|_, obj| {
            if object_slide(obj) == slide {
                removed.push(obj.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Filtered deep copy for persistence and undo snapshots: no internal id,
    /// no resolved URL fields.
    #[must_use]
    pub fn export(&self) -> WhiteboardExport {
        let room_items = self
            .objects
            .iter()
            .map(|(uid, obj)| (uid.clone(), strip_resolved(obj)))
            .collect();
        WhiteboardExport {
            x: self.x,
            y: self.y,
            zoom: self.zoom,
            full_fit: self.full_fit,
            created: self.created,
            slide: self.slide,
            name: self.name.clone(),
            room_items,
        }
    }
}

/// Copy of an object without recipient-specific URL fields.
#[must_use]
pub fn strip_resolved(obj: &ObjectState) -> ObjectState {
    let mut copy = obj.clone();
    for field in RESOLVED_URL_FIELDS {
        copy.shift_remove(*field);
    }
    copy
}

/// Persisted whiteboard format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardExport {
    pub x: i32,
    pub y: i32,
    pub zoom: i32,
    pub full_fit: bool,
    pub created: i64,
    pub slide: i32,
    pub name: String,
    pub room_items: IndexMap<String, ObjectState>,
}

impl WhiteboardExport {
    /// Exported objects in order.
    #[must_use]
    pub fn objects(&self) -> Vec<ObjectState> {
        self.room_items.values().cloned().collect()
    }
}

// =============================================================================
// ROOM CONTAINER
// =============================================================================

/// All whiteboards of one room plus the active pointer.
#[derive(Debug)]
pub struct RoomWhiteboards {
    pub room_id: RoomId,
    /// Stable container identifier, used when building file URLs.
    pub uid: String,
    active: Option<WhiteboardId>,
    whiteboards: IndexMap<WhiteboardId, Whiteboard>,
    next_id: WhiteboardId,
    language_id: i64,
}

impl RoomWhiteboards {
    #[must_use]
    pub fn new(room_id: RoomId, language_id: i64) -> Self {
        Self {
            room_id,
            uid: Uuid::new_v4().to_string(),
            active: None,
            whiteboards: IndexMap::new(),
            next_id: 0,
            language_id,
        }
    }

    #[must_use]
    pub fn active_id(&self) -> Option<WhiteboardId> {
        self.active
    }

    /// Locale the room was opened with; names lazily created defaults.
    #[must_use]
    pub fn language_id(&self) -> i64 {
        self.language_id
    }

    /// Set the active pointer. Not validated; callers pass a known id.
    pub fn set_active(&mut self, id: WhiteboardId) {
        self.active = Some(id);
    }

    #[must_use]
    pub fn get(&self, id: WhiteboardId) -> Option<&Whiteboard> {
        self.whiteboards.get(&id)
    }

    pub fn get_mut(&mut self, id: WhiteboardId) -> Option<&mut Whiteboard> {
        self.whiteboards.get_mut(&id)
    }

    #[must_use]
    pub fn contains(&self, id: WhiteboardId) -> bool {
        self.whiteboards.contains_key(&id)
    }

    pub fn active_mut(&mut self) -> Option<&mut Whiteboard> {
        let id = self.active?;
        self.whiteboards.get_mut(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.whiteboards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.whiteboards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WhiteboardId, &Whiteboard)> {
        self.whiteboards.iter()
    }

    /// First whiteboard in creation order.
    #[must_use]
    pub fn first_id(&self) -> Option<WhiteboardId> {
        self.whiteboards.keys().next().copied()
    }

    /// Append a whiteboard named for the requester's locale.
    pub fn add(&mut self, language_id: i64) -> &Whiteboard {
        let id = self.next_id;
        self.next_id += 1;
        let label = default_label(language_id);
        let name = if self.whiteboards.is_empty() {
            label.to_string()
        } else {
            format!("{label} {}", self.whiteboards.len() + 1)
        };
        self.whiteboards
            .entry(id)
            .or_insert_with(|| Whiteboard::new(id, name))
    }

    /// Lazily create and activate a default whiteboard when the room has none.
    pub fn ensure_default(&mut self, language_id: i64) -> bool {
        if !self.whiteboards.is_empty() {
            return false;
        }
        let id = self.add(language_id).id;
        self.active = Some(id);
        true
    }

    /// Remove one whiteboard, or with `None` reset to a single fresh default.
    /// Returns the ids that were removed.
    pub fn remove(&mut self, id: Option<WhiteboardId>) -> Vec<WhiteboardId> {
        match id {
            Some(id) => self
                .whiteboards
                .shift_remove(&id)
                .map(|wb| vec![wb.id])
                .unwrap_or_default(),
            None => {
                let removed: Vec<WhiteboardId> = self.whiteboards.keys().copied().collect();
                self.whiteboards.clear();
                self.active = None;
                self.ensure_default(self.language_id);
                removed
            }
        }
    }

    /// Ordered deep copy of every whiteboard.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(WhiteboardId, Whiteboard)> {
        self.whiteboards
            .iter()
            .map(|(id, wb)| (*id, wb.clone()))
            .collect()
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Process-wide registry of open rooms' whiteboards.
#[derive(Default)]
pub struct WhiteboardStore {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
}

impl WhiteboardStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Room container, created on first access together with a default
    /// whiteboard named for `language_id`.
    pub async fn get_or_create(&self, room_id: RoomId, language_id: i64) -> RoomHandle {
        let existing = self.rooms.read().await.get(&room_id).cloned();
        let handle = match existing {
            Some(handle) => handle,
            None => {
                let mut rooms = self.rooms.write().await;
                rooms
                    .entry(room_id)
                    .or_insert_with(|| {
                        info!(room_id, "opened whiteboard room");
                        Arc::new(Mutex::new(RoomWhiteboards::new(room_id, language_id)))
                    })
                    .clone()
            }
        };
        handle.lock().await.ensure_default(language_id);
        handle
    }

    /// Room container if it is open. Never creates.
    pub async fn get(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    /// Append a whiteboard. Does not change the active pointer.
    pub async fn add(&self, room_id: RoomId, language_id: i64) -> Whiteboard {
        let handle = self.get_or_create(room_id, language_id).await;
        let mut room = handle.lock().await;
        let wb = room.add(language_id).clone();
        info!(room_id, wb_id = wb.id, "whiteboard added");
        wb
    }

    /// Remove one whiteboard, or reset the room to one default with `None`.
    pub async fn remove(&self, room_id: RoomId, wb_id: Option<WhiteboardId>) -> Vec<WhiteboardId> {
        let Some(handle) = self.get(room_id).await else {
            return Vec::new();
        };
        let removed = handle.lock().await.remove(wb_id);
        info!(room_id, ?wb_id, removed = removed.len(), "whiteboard removed");
        removed
    }

    /// Set the active pointer. The id is not validated here.
    pub async fn set_active(&self, room_id: RoomId, wb_id: WhiteboardId) {
        if let Some(handle) = self.get(room_id).await {
            handle.lock().await.set_active(wb_id);
        }
    }

    /// Ordered `(id, whiteboard)` copies; the room always has at least one.
    pub async fn list(&self, room_id: RoomId, language_id: i64) -> Vec<(WhiteboardId, Whiteboard)> {
        let handle = self.get_or_create(room_id, language_id).await;
        let room = handle.lock().await;
        room.snapshot()
    }

    /// Room teardown. Returns whether the room was open.
    pub async fn close_room(&self, room_id: RoomId) -> bool {
        let closed = self.rooms.write().await.remove(&room_id).is_some();
        if closed {
            info!(room_id, "closed whiteboard room");
        }
        closed
    }

    /// Room teardown that re-checks `still_empty` under the store's write
    /// lock. A concurrent `get_or_create` either completes first (and its
    /// joiner makes the check fail) or waits and opens a fresh room.
    pub async fn close_room_if<F, Fut>(&self, room_id: RoomId, still_empty: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut rooms = self.rooms.write().await;
        if !rooms.contains_key(&room_id) || !still_empty().await {
            return false;
        }
        rooms.remove(&room_id);
        info!(room_id, "closed whiteboard room");
        true
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
#[path = "whiteboard_test.rs"]
mod tests;
