//! Whiteboard snapshot persistence — the `save` / `load` collaborator.
//!
//! DESIGN
//! ======
//! The router only needs "store this export under a name" and "give me the
//! export stored under a name". `FileSnapshotStore` keeps one pretty-printed
//! JSON file per snapshot under `<root>/room-<id>/`. Writes go to a temp file
//! and are renamed into place so a failed save never leaves a torn snapshot.
//!
//! ERROR HANDLING
//! ==============
//! Save/load failures are returned to the router, which surfaces them to the
//! requesting participant and leaves in-memory whiteboard state untouched.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::frame::ErrorCode;
use crate::services::session::RoomId;
use crate::services::whiteboard::WhiteboardExport;

const SNAPSHOT_EXT: &str = "wml";
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("invalid snapshot name: {0:?}")]
    InvalidName(String),
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed snapshot: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ErrorCode for PersistenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "E_SNAPSHOT_NAME",
            Self::NotFound(_) => "E_SNAPSHOT_NOT_FOUND",
            Self::Io(_) => "E_SNAPSHOT_IO",
            Self::Serde(_) => "E_SNAPSHOT_FORMAT",
        }
    }

    fn user_visible(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist an exported whiteboard under `name` for `room_id`.
    async fn save(&self, room_id: RoomId, name: &str, snapshot: &WhiteboardExport) -> Result<(), PersistenceError>;

    /// Read back a previously saved export.
    async fn load(&self, room_id: RoomId, name: &str) -> Result<WhiteboardExport, PersistenceError>;
}

/// Snapshot store backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, room_id: RoomId, name: &str) -> Result<PathBuf, PersistenceError> {
        let file = sanitize_name(name)?;
        Ok(self
            .root
            .join(format!("room-{room_id}"))
            .join(format!("{file}.{SNAPSHOT_EXT}")))
    }
}

/// Restrict snapshot names to a safe file stem.
fn sanitize_name(name: &str) -> Result<String, PersistenceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_NAME_LEN {
        return Err(PersistenceError::InvalidName(name.to_string()));
    }
    let cleaned: String = trimmed
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') { c } else { '_' })
        .collect();
    if cleaned.chars().all(|c| c == '_') {
        return Err(PersistenceError::InvalidName(name.to_string()));
    }
    Ok(cleaned)
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, room_id: RoomId, name: &str, snapshot: &WhiteboardExport) -> Result<(), PersistenceError> {
        let path = self.path_for(room_id, name)?;
        let json = serde_json::to_vec_pretty(snapshot)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension(format!("{SNAPSHOT_EXT}.tmp"));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        info!(room_id, path = %path.display(), bytes = json.len(), "saved whiteboard snapshot");
        Ok(())
    }

    async fn load(&self, room_id: RoomId, name: &str) -> Result<WhiteboardExport, PersistenceError> {
        let path = self.path_for(room_id, name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
