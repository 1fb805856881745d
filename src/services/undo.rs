//! Bounded single-level undo, one stack per whiteboard.
//!
//! DESIGN
//! ======
//! Each stack is a `VecDeque` with an explicit eviction rule: push to the
//! back, and when the stack grows past capacity drop the front (oldest)
//! entry. Popping consumes the newest entry; nothing is ever moved to a redo
//! stack.
//!
//! Stacks are keyed by `(room, whiteboard)` because whiteboard ids are only
//! unique within a room. They live behind a plain `std::sync::Mutex`: every
//! operation is a short, non-async critical section.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::services::session::RoomId;
use crate::services::whiteboard::{ObjectState, WhiteboardId};

/// Maximum entries kept per whiteboard.
pub const UNDO_CAPACITY: usize = 20;

// =============================================================================
// TYPES
// =============================================================================

/// Which forward operation an entry reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    /// Objects were created; undo deletes them.
    Added,
    /// Objects were removed; undo re-creates them.
    Removed,
    /// Objects were modified; undo restores the recorded prior values and
    /// deletes objects the modify introduced.
    Modified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub wb_id: WhiteboardId,
    pub kind: UndoKind,
    /// Object states needed to invert the forward operation.
    pub objects: Vec<ObjectState>,
    /// Uids a modify introduced without prior state; undo deletes them.
    pub fresh: Vec<String>,
}

impl UndoEntry {
    #[must_use]
    pub fn added(wb_id: WhiteboardId, object: ObjectState) -> Self {
        Self { wb_id, kind: UndoKind::Added, objects: vec![object], fresh: Vec::new() }
    }

    #[must_use]
    pub fn removed(wb_id: WhiteboardId, objects: Vec<ObjectState>) -> Self {
        Self { wb_id, kind: UndoKind::Removed, objects, fresh: Vec::new() }
    }

    #[must_use]
    pub fn modified(wb_id: WhiteboardId, prior: Vec<ObjectState>, fresh: Vec<String>) -> Self {
        Self { wb_id, kind: UndoKind::Modified, objects: prior, fresh }
    }
}

/// Fixed-capacity stack that evicts its oldest entry on overflow.
#[derive(Debug)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
    capacity: usize,
}

impl UndoStack {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity + 1), capacity }
    }

    /// Push an entry, returning the evicted oldest entry if capacity was exceeded.
    pub fn push(&mut self, entry: UndoEntry) -> Option<UndoEntry> {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            return self.entries.pop_front();
        }
        None
    }

    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// MANAGER
// =============================================================================

pub struct UndoManager {
    stacks: Mutex<HashMap<(RoomId, WhiteboardId), UndoStack>>,
    capacity: usize,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(UNDO_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { stacks: Mutex::new(HashMap::new()), capacity }
    }

    /// Record an entry for a whiteboard. No-op without a whiteboard id.
    pub fn push(&self, room_id: RoomId, wb_id: Option<WhiteboardId>, entry: UndoEntry) {
        let Some(wb_id) = wb_id else {
            return;
        };
        let mut stacks = self
            .stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let capacity = self.capacity;
        let stack = stacks
            .entry((room_id, wb_id))
            .or_insert_with(|| UndoStack::with_capacity(capacity));
        if stack.push(entry).is_some() {
            debug!(room_id, wb_id, "undo stack full; evicted oldest entry");
        }
    }

    /// Take the most recent entry, if any.
    pub fn pop(&self, room_id: RoomId, wb_id: WhiteboardId) -> Option<UndoEntry> {
        let mut stacks = self
            .stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stacks.get_mut(&(room_id, wb_id)).and_then(UndoStack::pop)
    }

    /// Number of entries recorded for a whiteboard.
    pub fn depth(&self, room_id: RoomId, wb_id: WhiteboardId) -> usize {
        let stacks = self
            .stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stacks.get(&(room_id, wb_id)).map_or(0, UndoStack::len)
    }

    /// Drop a whiteboard's stack (the whiteboard was removed).
    pub fn discard(&self, room_id: RoomId, wb_id: WhiteboardId) {
        let mut stacks = self
            .stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stacks.remove(&(room_id, wb_id));
    }

    /// Drop every stack of a room (the room closed).
    pub fn discard_room(&self, room_id: RoomId) {
        let mut stacks = self
            .stacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stacks.retain(|(room, _), _| *room != room_id);
    }
}

#[cfg(test)]
#[path = "undo_test.rs"]
mod tests;
