//! Action router — typed whiteboard commands, capability gate, dispatch.
//!
//! DESIGN
//! ======
//! Every inbound envelope goes through the same pipeline:
//!
//! 1. `Command::decode` turns the loose `{action, obj}` envelope into one
//!    tagged variant carrying exactly its fields. Anything malformed stops
//!    here with a typed `ActionError`.
//! 2. `authorize` checks the acting session's rights and room membership.
//! 3. The room's whiteboard container is locked and `execute` applies the
//!    mutation plus its undo entry synchronously. It returns an `Outcome`
//!    describing who receives what; execute never sends anything itself.
//! 4. Broadcasts are fanned out through the hub while the room lock is still
//!    held, so every member observes one room's calls in mutation order.
//!    Delivery is `try_send`, so holding the lock never waits on a client.
//!
//! Pointer payloads (ephemeral cursors) short-circuit after decoding: they
//! are relayed to the other members and never touch the store or undo.
//!
//! ERROR HANDLING
//! ==============
//! Rejected commands are a silent no-op towards the client and are logged at
//! `debug` with their error code. Snapshot failures are the exception: they
//! are logged at `warn` and reach the originator as an `error` frame, with
//! the whiteboard state left untouched.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Envelope, ErrorCode, Frame, WbCall, WbMethod};
use crate::services::broadcast::{Audience, BroadcastHub};
use crate::services::files::{FileKind, FileResolver, project_object};
use crate::services::persistence::{PersistenceError, SnapshotStore};
use crate::services::session::{Right, RoomId, Session};
use crate::services::undo::{UndoEntry, UndoKind, UndoManager};
use crate::services::whiteboard::{
    ObjectState, RoomWhiteboards, Whiteboard, WhiteboardExport, WhiteboardId, WhiteboardStore, object_uid,
    strip_resolved,
};

/// Size given to dropped files that carry no dimensions.
pub const DEFAULT_FILE_WIDTH: i64 = 640;
pub const DEFAULT_FILE_HEIGHT: i64 = 480;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("malformed {action} payload: {reason}")]
    Malformed { action: &'static str, reason: String },
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("{action} requires {required}")]
    Forbidden { action: &'static str, required: &'static str },
    #[error("session is not in a room")]
    NotInRoom,
    #[error("whiteboard not found: {0}")]
    UnknownWhiteboard(WhiteboardId),
    #[error("Unexpected error while saving WB: {0}")]
    Save(PersistenceError),
    #[error("Unexpected error while loading WB: {0}")]
    Load(PersistenceError),
}

impl ErrorCode for ActionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "E_MALFORMED",
            Self::UnknownAction(_) => "E_UNKNOWN_ACTION",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::NotInRoom => "E_NOT_IN_ROOM",
            Self::UnknownWhiteboard(_) => "E_WB_NOT_FOUND",
            Self::Save(e) | Self::Load(e) => e.error_code(),
        }
    }

    fn user_visible(&self) -> bool {
        matches!(self, Self::Save(_) | Self::Load(_))
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// A file dropped onto the active whiteboard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDrop {
    pub file_id: i64,
    pub file_type: String,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    /// Clear the whiteboard before placing the file.
    #[serde(default)]
    pub clean: bool,
}

/// One validated inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateWb,
    /// `None` resets the room to a single fresh whiteboard.
    RemoveWb { wb_id: Option<WhiteboardId> },
    ActivateWb { wb_id: WhiteboardId },
    SetSlide { wb_id: WhiteboardId, slide: i32 },
    CreateObj { wb_id: WhiteboardId, obj: ObjectState },
    ModifyObj { wb_id: WhiteboardId, objs: Vec<ObjectState> },
    DeleteObj { wb_id: WhiteboardId, objs: Vec<ObjectState> },
    ClearAll { wb_id: WhiteboardId },
    ClearSlide { wb_id: WhiteboardId, slide: i64 },
    Save { wb_id: WhiteboardId, name: String },
    /// `None` targets the active whiteboard.
    Load { wb_id: Option<WhiteboardId>, name: String },
    AddFile(FileDrop),
    Undo { wb_id: WhiteboardId },
    /// Ephemeral cursor relayed as-is under the original method name.
    Pointer { method: WbMethod, payload: Value },
}

/// Capability a command needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Presenter,
    /// Presenter or whiteboard right.
    Draw,
    /// Room membership only.
    Member,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WbRef {
    wb_id: WhiteboardId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionalWbRef {
    #[serde(default)]
    wb_id: Option<WhiteboardId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlideRef {
    wb_id: WhiteboardId,
    #[serde(default)]
    slide: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SingleObject {
    wb_id: WhiteboardId,
    obj: ObjectState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectBatch {
    wb_id: WhiteboardId,
    obj: Vec<ObjectState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedRef {
    #[serde(default)]
    wb_id: Option<WhiteboardId>,
    name: String,
}

/// Typed view of an action payload. A missing `obj` reads as `{}`.
fn payload<T: DeserializeOwned>(action: &'static str, obj: &Value) -> Result<T, ActionError> {
    let obj = if obj.is_null() { json!({}) } else { obj.clone() };
    serde_json::from_value(obj).map_err(|e| ActionError::Malformed { action, reason: e.to_string() })
}

fn require_uids(action: &'static str, objs: &[ObjectState]) -> Result<(), ActionError> {
    if objs.iter().all(|o| object_uid(o).is_some()) {
        Ok(())
    } else {
        Err(ActionError::Malformed { action, reason: "object without uid".into() })
    }
}

fn is_pointer(obj: &Value) -> bool {
    obj.get("obj")
        .and_then(|o| o.get("type"))
        .and_then(Value::as_str)
        == Some("pointer")
}

/// Negative ids mean "no whiteboard".
fn non_negative(id: Option<WhiteboardId>) -> Option<WhiteboardId> {
    id.filter(|id| *id >= 0)
}

impl Command {
    /// Validate an envelope into a typed command.
    pub fn decode(envelope: &Envelope) -> Result<Self, ActionError> {
        let obj = &envelope.obj;
        let command = match envelope.action.as_str() {
            "createObj" | "modifyObj" if is_pointer(obj) => {
                let method = if envelope.action == "createObj" { WbMethod::CreateObj } else { WbMethod::ModifyObj };
                Self::Pointer { method, payload: obj.clone() }
            }
            "createWb" => Self::CreateWb,
            "removeWb" => {
                let r: OptionalWbRef = payload("removeWb", obj)?;
                Self::RemoveWb { wb_id: non_negative(r.wb_id) }
            }
            "activateWb" => {
                let r: OptionalWbRef = payload("activateWb", obj)?;
                let wb_id = non_negative(r.wb_id).ok_or_else(|| ActionError::Malformed {
                    action: "activateWb",
                    reason: "wbId is required".into(),
                })?;
                Self::ActivateWb { wb_id }
            }
            "setSlide" => {
                let r: SlideRef = payload("setSlide", obj)?;
                let slide = i32::try_from(r.slide.unwrap_or(0)).map_err(|e| ActionError::Malformed {
                    action: "setSlide",
                    reason: e.to_string(),
                })?;
                Self::SetSlide { wb_id: r.wb_id, slide }
            }
            "createObj" => {
                let p: SingleObject = payload("createObj", obj)?;
                require_uids("createObj", std::slice::from_ref(&p.obj))?;
                Self::CreateObj { wb_id: p.wb_id, obj: p.obj }
            }
            "modifyObj" => {
                let p: ObjectBatch = payload("modifyObj", obj)?;
                require_uids("modifyObj", &p.obj)?;
                Self::ModifyObj { wb_id: p.wb_id, objs: p.obj }
            }
            "deleteObj" => {
                let p: ObjectBatch = payload("deleteObj", obj)?;
                require_uids("deleteObj", &p.obj)?;
                Self::DeleteObj { wb_id: p.wb_id, objs: p.obj }
            }
            "clearAll" => {
                let r: WbRef = payload("clearAll", obj)?;
                Self::ClearAll { wb_id: r.wb_id }
            }
            "clearSlide" => {
                let r: SlideRef = payload("clearSlide", obj)?;
                let slide = r.slide.ok_or_else(|| ActionError::Malformed {
                    action: "clearSlide",
                    reason: "slide is required".into(),
                })?;
                Self::ClearSlide { wb_id: r.wb_id, slide }
            }
            "save" => {
                let r: NamedRef = payload("save", obj)?;
                let wb_id = non_negative(r.wb_id).ok_or_else(|| ActionError::Malformed {
                    action: "save",
                    reason: "wbId is required".into(),
                })?;
                Self::Save { wb_id, name: r.name }
            }
            "load" => {
                let r: NamedRef = payload("load", obj)?;
                Self::Load { wb_id: non_negative(r.wb_id), name: r.name }
            }
            "addFile" => Self::decode_file_drop(obj)?,
            "undo" => {
                let r: WbRef = payload("undo", obj)?;
                Self::Undo { wb_id: r.wb_id }
            }
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };
        Ok(command)
    }

    /// A dropped saved-whiteboard file loads into the active whiteboard.
    fn decode_file_drop(obj: &Value) -> Result<Self, ActionError> {
        let drop: FileDrop = payload("addFile", obj)?;
        if FileKind::parse(&drop.file_type) != FileKind::WmlFile {
            return Ok(Self::AddFile(drop));
        }
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Malformed { action: "addFile", reason: "WmlFile requires name".into() })?;
        Ok(Self::Load { wb_id: None, name: name.to_string() })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateWb => "createWb",
            Self::RemoveWb { .. } => "removeWb",
            Self::ActivateWb { .. } => "activateWb",
            Self::SetSlide { .. } => "setSlide",
            Self::CreateObj { .. } => "createObj",
            Self::ModifyObj { .. } => "modifyObj",
            Self::DeleteObj { .. } => "deleteObj",
            Self::ClearAll { .. } => "clearAll",
            Self::ClearSlide { .. } => "clearSlide",
            Self::Save { .. } => "save",
            Self::Load { .. } => "load",
            Self::AddFile(_) => "addFile",
            Self::Undo { .. } => "undo",
            Self::Pointer { .. } => "pointer",
        }
    }

    #[must_use]
    pub fn gate(&self) -> Gate {
        match self {
            Self::CreateWb
            | Self::RemoveWb { .. }
            | Self::ActivateWb { .. }
            | Self::SetSlide { .. }
            | Self::ClearAll { .. }
            | Self::Load { .. }
            | Self::AddFile(_) => Gate::Presenter,
            Self::CreateObj { .. }
            | Self::ModifyObj { .. }
            | Self::DeleteObj { .. }
            | Self::ClearSlide { .. }
            | Self::Save { .. }
            | Self::Undo { .. } => Gate::Draw,
            Self::Pointer { .. } => Gate::Member,
        }
    }
}

/// Check rights and membership. Returns the room the command applies to.
pub fn authorize(session: &Session, command: &Command) -> Result<RoomId, ActionError> {
    let room_id = session.room_id.ok_or(ActionError::NotInRoom)?;
    let allowed = match command.gate() {
        Gate::Presenter => session.has_right(Right::Presenter),
        Gate::Draw => session.has_right(Right::Presenter) || session.has_right(Right::Whiteboard),
        Gate::Member => true,
    };
    if !allowed {
        let required = match command.gate() {
            Gate::Presenter => "presenter",
            _ => "presenter or whiteBoard",
        };
        return Err(ActionError::Forbidden { action: command.name(), required });
    }
    Ok(room_id)
}

/// Client role label for `WbArea.setRole`.
#[must_use]
pub fn role_for(session: &Session) -> &'static str {
    if session.has_right(Right::Presenter) {
        "presenter"
    } else if session.has_right(Right::Whiteboard) {
        "whiteBoard"
    } else {
        "none"
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// One call fanned out to part of the room.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub call: WbCall,
    pub audience: Audience,
    /// Room container uid when the call's `obj` payload must be projected
    /// per recipient (resolved file URLs).
    pub room_uid: Option<String>,
}

impl Broadcast {
    fn all(call: WbCall) -> Self {
        Self { call, audience: Audience::All, room_uid: None }
    }

    fn others(call: WbCall, token: &str) -> Self {
        Self { call, audience: Audience::Others(token.to_string()), room_uid: None }
    }

    fn projected(mut self, room_uid: &str) -> Self {
        self.room_uid = Some(room_uid.to_string());
        self
    }
}

/// What a command produced. Execution never sends frames directly; the
/// router applies the outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Calls to fan out, in order.
    Broadcast(Vec<Broadcast>),
    /// Export to hand to the snapshot store.
    Persist { wb_id: WhiteboardId, name: String, snapshot: WhiteboardExport },
    /// Accepted with nothing to send.
    Done,
}

// =============================================================================
// ROUTER
// =============================================================================

pub struct ActionRouter {
    store: Arc<WhiteboardStore>,
    undo: Arc<UndoManager>,
    hub: Arc<BroadcastHub>,
    files: Arc<dyn FileResolver>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl ActionRouter {
    #[must_use]
    pub fn new(
        store: Arc<WhiteboardStore>,
        undo: Arc<UndoManager>,
        hub: Arc<BroadcastHub>,
        files: Arc<dyn FileResolver>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self { store, undo, hub, files, snapshots }
    }

    /// Parse and handle one inbound text message. Returns frames for the
    /// sender only; everything else goes out through the hub.
    pub async fn dispatch_text(&self, session: &Session, text: &str) -> Vec<Frame> {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.dispatch(session, &envelope).await,
            Err(e) => {
                debug!(session_id = session.id, error = %e, code = "E_MALFORMED", "wb: ignored invalid envelope");
                Vec::new()
            }
        }
    }

    /// Handle one envelope, absorbing every error at this boundary.
    pub async fn dispatch(&self, session: &Session, envelope: &Envelope) -> Vec<Frame> {
        match self.handle(session, envelope).await {
            Ok(_) => Vec::new(),
            Err(e) if e.user_visible() => {
                warn!(session_id = session.id, action = %envelope.action, code = e.error_code(), error = %e, "wb: action failed");
                vec![Frame::error(e.to_string())]
            }
            Err(e) => {
                debug!(session_id = session.id, action = %envelope.action, code = e.error_code(), error = %e, "wb: action ignored");
                Vec::new()
            }
        }
    }

    /// Decode, authorize, execute and fan out one command.
    pub async fn handle(&self, session: &Session, envelope: &Envelope) -> Result<Outcome, ActionError> {
        let command = Command::decode(envelope)?;
        let room_id = authorize(session, &command)?;

        if let Command::Pointer { method, payload } = command {
            let call = WbCall::new(method, payload);
            self.hub.send_others(room_id, &session.token, &call).await;
            return Ok(Outcome::Done);
        }

        let loaded = match &command {
            Command::Load { name, .. } => Some(self.snapshots.load(room_id, name).await.map_err(ActionError::Load)?),
            _ => None,
        };

        let action = command.name();
        let handle = self.store.get_or_create(room_id, session.language_id).await;
        let outcome = {
            let mut room = handle.lock().await;
            let outcome = self.execute(&mut room, session, command, loaded)?;
            if let Outcome::Broadcast(broadcasts) = &outcome {
                self.fan_out(room_id, broadcasts).await;
            }
            outcome
        };
        debug!(session_id = session.id, room_id, action, "wb: action applied");

        if let Outcome::Persist { wb_id, name, snapshot } = &outcome {
            self.snapshots
                .save(room_id, name, snapshot)
                .await
                .map_err(ActionError::Save)?;
            info!(room_id, wb_id, name = %name, "wb: whiteboard saved");
        }
        Ok(outcome)
    }

    /// Apply one authorized command to a locked room.
    fn execute(
        &self,
        room: &mut RoomWhiteboards,
        session: &Session,
        command: Command,
        loaded: Option<WhiteboardExport>,
    ) -> Result<Outcome, ActionError> {
        let room_id = room.room_id;
        let room_uid = room.uid.clone();
        let token = session.token.as_str();

        let outcome = match command {
            Command::CreateWb => {
                let wb = room.add(session.language_id);
                Outcome::Broadcast(vec![Broadcast::all(create_wb_call(wb))])
            }
            Command::RemoveWb { wb_id } => Outcome::Broadcast(self.remove_whiteboard(room, wb_id)?),
            Command::ActivateWb { wb_id } => {
                require_whiteboard(room, wb_id)?;
                room.set_active(wb_id);
                Outcome::Broadcast(vec![Broadcast::all(activate_call(wb_id))])
            }
            Command::SetSlide { wb_id, slide } => {
                whiteboard_mut(room, wb_id)?.slide = slide;
                let call = WbCall::new(WbMethod::SetSlide, json!({"wbId": wb_id, "slide": slide}));
                Outcome::Broadcast(vec![Broadcast::others(call, token)])
            }
            Command::CreateObj { wb_id, obj } => {
                let wb = whiteboard_mut(room, wb_id)?;
                if let Some(uid) = object_uid(&obj) {
                    wb.put(uid, obj.clone());
                }
                self.undo
                    .push(room_id, Some(wb_id), UndoEntry::added(wb_id, strip_resolved(&obj)));
                let call = objects_call(WbMethod::CreateObj, wb_id, Value::Object(obj));
                Outcome::Broadcast(vec![Broadcast::others(call, token).projected(&room_uid)])
            }
            Command::ModifyObj { wb_id, objs } => {
                let wb = whiteboard_mut(room, wb_id)?;
                let mut prior = Vec::new();
                let mut fresh = Vec::new();
                for obj in &objs {
                    let Some(uid) = object_uid(obj) else { continue };
                    match wb.put(uid, obj.clone()) {
                        Some(old) => prior.push(strip_resolved(&old)),
                        None => fresh.push(uid.to_string()),
                    }
                }
                if !objs.is_empty() {
                    self.undo
                        .push(room_id, Some(wb_id), UndoEntry::modified(wb_id, prior, fresh));
                }
                let call = objects_call(WbMethod::ModifyObj, wb_id, objects_value(objs));
                Outcome::Broadcast(vec![Broadcast::others(call, token).projected(&room_uid)])
            }
            Command::DeleteObj { wb_id, objs } => {
                let wb = whiteboard_mut(room, wb_id)?;
                let removed: Vec<ObjectState> = objs
                    .iter()
                    .filter_map(object_uid)
                    .filter_map(|uid| wb.remove(uid))
                    .map(|obj| strip_resolved(&obj))
                    .collect();
                if !removed.is_empty() {
                    self.undo
                        .push(room_id, Some(wb_id), UndoEntry::removed(wb_id, removed));
                }
                let call = objects_call(WbMethod::DeleteObj, wb_id, objects_value(objs));
                Outcome::Broadcast(vec![Broadcast::all(call)])
            }
            Command::ClearAll { wb_id } => {
                let wb = whiteboard_mut(room, wb_id)?;
                Outcome::Broadcast(vec![self.clear_all(room_id, wb)])
            }
            Command::ClearSlide { wb_id, slide } => {
                let wb = whiteboard_mut(room, wb_id)?;
                let removed: Vec<ObjectState> = wb
                    .remove_slide(slide)
                    .iter()
                    .map(strip_resolved)
                    .collect();
                if !removed.is_empty() {
                    self.undo
                        .push(room_id, Some(wb_id), UndoEntry::removed(wb_id, removed));
                }
                let call = WbCall::new(WbMethod::ClearSlide, json!({"wbId": wb_id, "slide": slide}));
                Outcome::Broadcast(vec![Broadcast::all(call)])
            }
            Command::Save { wb_id, name } => {
                let snapshot = room
                    .get(wb_id)
                    .ok_or(ActionError::UnknownWhiteboard(wb_id))?
                    .export();
                Outcome::Persist { wb_id, name, snapshot }
            }
            Command::Load { wb_id, .. } => {
                let Some(snapshot) = loaded else {
                    return Ok(Outcome::Done);
                };
                let target = match wb_id {
                    Some(id) => id,
                    None => active_whiteboard(room)?,
                };
                let wb = whiteboard_mut(room, target)?;
                let mut objs = Vec::with_capacity(snapshot.room_items.len());
                for (uid, obj) in snapshot.room_items {
                    wb.put(uid, obj.clone());
                    objs.push(obj);
                }
                let call = objects_call(WbMethod::Load, target, objects_value(objs));
                Outcome::Broadcast(vec![Broadcast::all(call).projected(&room_uid)])
            }
            Command::AddFile(drop) => self.add_file(room, &drop)?,
            Command::Undo { wb_id } => {
                let wb = whiteboard_mut(room, wb_id)?;
                match self.undo.pop(room_id, wb_id) {
                    Some(entry) => Outcome::Broadcast(
                        apply_inverse(wb, entry)
                            .into_iter()
                            .map(|b| b.projected(&room_uid))
                            .collect(),
                    ),
                    None => Outcome::Done,
                }
            }
            Command::Pointer { .. } => Outcome::Done,
        };
        Ok(outcome)
    }

    /// Remove one whiteboard (healing the active pointer) or reset the room.
    fn remove_whiteboard(
        &self,
        room: &mut RoomWhiteboards,
        wb_id: Option<WhiteboardId>,
    ) -> Result<Vec<Broadcast>, ActionError> {
        let room_id = room.room_id;
        if let Some(id) = wb_id {
            require_whiteboard(room, id)?;
        }
        let was_active = wb_id.is_none() || wb_id == room.active_id();
        let removed = room.remove(wb_id);

        let mut broadcasts = Vec::new();
        for id in &removed {
            self.undo.discard(room_id, *id);
            broadcasts.push(Broadcast::all(WbCall::new(WbMethod::RemoveWb, json!({"wbId": id}))));
        }
        // A full reset already holds a fresh default; a single removal may
        // have emptied the room.
        let fresh = room.ensure_default(room.language_id()) || wb_id.is_none();
        if fresh && let Some(wb) = room.first_id().and_then(|id| room.get(id)) {
            broadcasts.push(Broadcast::all(create_wb_call(wb)));
        }
        if was_active && let Some(next) = room.first_id() {
            room.set_active(next);
            broadcasts.push(Broadcast::all(activate_call(next)));
        }
        Ok(broadcasts)
    }

    /// Snapshot, record and empty a whiteboard.
    fn clear_all(&self, room_id: RoomId, wb: &mut Whiteboard) -> Broadcast {
        let objects = wb.export().objects();
        if !objects.is_empty() {
            self.undo
                .push(room_id, Some(wb.id), UndoEntry::removed(wb.id, objects));
        }
        wb.clear();
        Broadcast::all(WbCall::new(WbMethod::ClearAll, json!({"wbId": wb.id})))
    }

    fn add_file(&self, room: &mut RoomWhiteboards, drop: &FileDrop) -> Result<Outcome, ActionError> {
        let kind = FileKind::parse(&drop.file_type);
        if matches!(kind, FileKind::Folder | FileKind::PollChart) {
            return Ok(Outcome::Done);
        }
        let room_id = room.room_id;
        let room_uid = room.uid.clone();
        let wb = room.active_mut().ok_or(ActionError::UnknownWhiteboard(-1))?;
        let wb_id = wb.id;

        let mut broadcasts = Vec::new();
        if drop.clean {
            broadcasts.push(self.clear_all(room_id, wb));
        }
        let uid = Uuid::new_v4().to_string();
        let mut file = ObjectState::new();
        file.insert("fileId".into(), json!(drop.file_id));
        file.insert("fileType".into(), json!(kind.as_str()));
        file.insert("count".into(), json!(drop.count.unwrap_or(0)));
        file.insert("type".into(), json!("image"));
        file.insert("left".into(), json!(0));
        file.insert("top".into(), json!(0));
        file.insert("width".into(), json!(drop.width.unwrap_or(DEFAULT_FILE_WIDTH)));
        file.insert("height".into(), json!(drop.height.unwrap_or(DEFAULT_FILE_HEIGHT)));
        file.insert("uid".into(), json!(uid));
        file.insert("slide".into(), json!(wb.slide));
        wb.put(uid, file.clone());
        let call = objects_call(WbMethod::CreateObj, wb_id, Value::Object(file));
        broadcasts.push(Broadcast::all(call).projected(&room_uid));
        Ok(Outcome::Broadcast(broadcasts))
    }

    async fn fan_out(&self, room_id: RoomId, broadcasts: &[Broadcast]) {
        for broadcast in broadcasts {
            let room_uid = broadcast.room_uid.as_deref();
            self.hub
                .send_to_audience(room_id, &broadcast.call, &broadcast.audience, |call, recipient| match room_uid {
                    Some(uid) => Frame::wb(&self.project_call(call, &recipient.token, uid)),
                    None => Frame::wb(call),
                })
                .await;
        }
    }

    /// Copy of `call` with its `obj` payload projected for one recipient.
    fn project_call(&self, call: &WbCall, recipient: &str, room_uid: &str) -> WbCall {
        let mut projected = call.clone();
        if let Some(obj) = projected.args.as_mut().and_then(|args| args.get_mut("obj")) {
            match obj {
                Value::Object(o) => *o = project_object(self.files.as_ref(), o, recipient, room_uid),
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if let Value::Object(o) = item {
                            *o = project_object(self.files.as_ref(), o, recipient, room_uid);
                        }
                    }
                }
                _ => {}
            }
        }
        projected
    }

    // =========================================================================
    // ROOM LIFECYCLE
    // =========================================================================

    /// Initial load sequence for a participant that just attached.
    pub async fn initial_sync(&self, session: &Session) -> Vec<Frame> {
        let Some(room_id) = session.room_id else {
            return Vec::new();
        };
        let handle = self.store.get_or_create(room_id, session.language_id).await;
        let room = handle.lock().await;

        let mut frames = vec![Frame::wb(&WbCall::bare(WbMethod::Init))];
        for (id, wb) in room.iter() {
            frames.push(Frame::wb(&create_wb_call(wb)));
            let load = objects_call(WbMethod::Load, *id, objects_value(wb.objects()));
            frames.push(Frame::wb(&self.project_call(&load, &session.token, &room.uid)));
        }
        if let Some(active) = room.active_id().or_else(|| room.first_id()) {
            frames.push(Frame::wb(&activate_call(active)));
        }
        frames.push(role_frame(session));
        frames
    }

    /// Drop a room's whiteboards and undo history, provided `still_empty`
    /// holds once the store is locked.
    pub async fn close_room_if<F, Fut>(&self, room_id: RoomId, still_empty: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let closed = self.store.close_room_if(room_id, still_empty).await;
        if closed {
            self.undo.discard_room(room_id);
        }
        closed
    }
}

/// `WbArea.setRole(...)` for a session's current rights.
#[must_use]
pub fn role_frame(session: &Session) -> Frame {
    Frame::wb(&WbCall::new(WbMethod::SetRole, json!(role_for(session))))
}

// =============================================================================
// HELPERS
// =============================================================================

fn require_whiteboard(room: &RoomWhiteboards, wb_id: WhiteboardId) -> Result<(), ActionError> {
    if room.contains(wb_id) {
        Ok(())
    } else {
        Err(ActionError::UnknownWhiteboard(wb_id))
    }
}

fn whiteboard_mut(room: &mut RoomWhiteboards, wb_id: WhiteboardId) -> Result<&mut Whiteboard, ActionError> {
    room.get_mut(wb_id).ok_or(ActionError::UnknownWhiteboard(wb_id))
}

fn active_whiteboard(room: &RoomWhiteboards) -> Result<WhiteboardId, ActionError> {
    room.active_id()
        .filter(|id| room.contains(*id))
        .ok_or(ActionError::UnknownWhiteboard(-1))
}

fn create_wb_call(wb: &Whiteboard) -> WbCall {
    WbCall::new(WbMethod::CreateWb, json!({"wbId": wb.id, "name": wb.name}))
}

fn activate_call(wb_id: WhiteboardId) -> WbCall {
    WbCall::new(WbMethod::ActivateWb, json!({"wbId": wb_id}))
}

fn objects_call(method: WbMethod, wb_id: WhiteboardId, obj: Value) -> WbCall {
    WbCall::new(method, json!({"wbId": wb_id, "obj": obj}))
}

fn objects_value(objs: Vec<ObjectState>) -> Value {
    Value::Array(objs.into_iter().map(Value::Object).collect())
}

/// Revert one undo entry on the whiteboard and describe the calls that
/// tell every member about it.
fn apply_inverse(wb: &mut Whiteboard, entry: UndoEntry) -> Vec<Broadcast> {
    let wb_id = wb.id;
    match entry.kind {
        UndoKind::Added => {
            for uid in entry.objects.iter().filter_map(object_uid) {
                wb.remove(uid);
            }
            vec![Broadcast::all(objects_call(WbMethod::DeleteObj, wb_id, objects_value(entry.objects)))]
        }
        UndoKind::Removed => {
            restore(wb, &entry.objects);
            vec![Broadcast::all(objects_call(WbMethod::CreateObj, wb_id, objects_value(entry.objects)))]
        }
        UndoKind::Modified => {
            let mut broadcasts = Vec::new();
            if !entry.objects.is_empty() {
                restore(wb, &entry.objects);
                broadcasts.push(Broadcast::all(objects_call(
                    WbMethod::ModifyObj,
                    wb_id,
                    objects_value(entry.objects),
                )));
            }
            if !entry.fresh.is_empty() {
                let gone: Vec<ObjectState> = entry
                    .fresh
                    .iter()
                    .filter_map(|uid| wb.remove(uid))
                    .map(|obj| strip_resolved(&obj))
                    .collect();
                broadcasts.push(Broadcast::all(objects_call(WbMethod::DeleteObj, wb_id, objects_value(gone))));
            }
            broadcasts
        }
    }
}

fn restore(wb: &mut Whiteboard, objects: &[ObjectState]) {
    for obj in objects {
        if let Some(uid) = object_uid(obj) {
            wb.put(uid, obj.clone());
        }
    }
}

#[cfg(test)]
#[path = "action_test.rs"]
mod tests;
