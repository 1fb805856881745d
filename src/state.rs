//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the process-wide registries (sessions, whiteboards, undo
//! history, outbound channels) and the collaborators the action router
//! talks to. Every registry is built once here and handed to its users;
//! nothing reaches state through a global.

use std::sync::Arc;

use crate::config::Config;
use crate::services::action::ActionRouter;
use crate::services::broadcast::BroadcastHub;
use crate::services::files::{FileResolver, UrlFileResolver};
use crate::services::persistence::{FileSnapshotStore, SnapshotStore};
use crate::services::session::SessionRegistry;
use crate::services::undo::UndoManager;
use crate::services::whiteboard::WhiteboardStore;

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<WhiteboardStore>,
    pub undo: Arc<UndoManager>,
    pub hub: Arc<BroadcastHub>,
    pub router: Arc<ActionRouter>,
}

impl AppState {
    /// Wire the registries with the default file resolver and a filesystem
    /// snapshot store rooted at `config.snapshot_dir`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let files: Arc<dyn FileResolver> = Arc::new(UrlFileResolver::new(config.file_base_url.clone()));
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(config.snapshot_dir.clone()));
        Self::with_collaborators(config, files, snapshots)
    }

    #[must_use]
    pub fn with_collaborators(
        config: Config,
        files: Arc<dyn FileResolver>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(WhiteboardStore::new());
        let undo = Arc::new(UndoManager::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone()));
        let router = Arc::new(ActionRouter::new(store.clone(), undo.clone(), hub.clone(), files, snapshots));
        Self { config: Arc::new(config), registry, store, undo, hub, router }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::frame::Frame;
    use crate::services::session::{Right, RoomId, Session};
    use tokio::sync::mpsc;

    /// Test `AppState` whose snapshot store lives in a temp dir. Keep the
    /// returned `TempDir` alive for the duration of the test.
    #[must_use]
    pub fn test_app_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir should be creatable");
        let config = Config { snapshot_dir: dir.path().to_path_buf(), ..Config::default() };
        (AppState::new(config), dir)
    }

    /// Register a primary session in `room_id` and attach an outbound channel.
    pub async fn join(
        state: &AppState,
        room_id: RoomId,
        token: &str,
        rights: &[Right],
    ) -> (Session, mpsc::Receiver<Frame>) {
        let session = state
            .registry
            .add(Session::new(token, Some(room_id)).with_rights(rights.iter().copied()))
            .await;
        let (tx, rx) = mpsc::channel(64);
        state.hub.attach(session.id, tx).await;
        (session, rx)
    }
}
