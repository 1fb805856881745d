//! Broadcast hub — fan a whiteboard call out to a room's sessions.
//!
//! DESIGN
//! ======
//! Room membership comes from the `SessionRegistry`; delivery goes through
//! the per-session `mpsc` channel registered by the websocket handler. The
//! hub snapshots members and senders, releases its lock, then `try_send`s
//! to each recipient. A full or closed channel drops that one frame and
//! delivery continues; the caller never waits on a slow recipient and a
//! failed delivery never reaches back into the mutation that caused it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::frame::{Frame, WbCall};
use crate::services::session::{RoomId, Session, SessionId, SessionRegistry};

/// Who in the room receives a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every member, originator included.
    All,
    /// Every member except sessions carrying this identity token.
    Others(String),
}

pub struct BroadcastHub {
    registry: Arc<SessionRegistry>,
    channels: RwLock<HashMap<SessionId, mpsc::Sender<Frame>>>,
}

impl BroadcastHub {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry, channels: RwLock::new(HashMap::new()) }
    }

    /// Register the outbound channel of a connected session.
    pub async fn attach(&self, session_id: SessionId, tx: mpsc::Sender<Frame>) {
        self.channels.write().await.insert(session_id, tx);
    }

    pub async fn detach(&self, session_id: SessionId) -> bool {
        self.channels.write().await.remove(&session_id).is_some()
    }

    /// Deliver one frame to one session. Returns whether it was queued.
    pub async fn send_to(&self, session_id: SessionId, frame: Frame) -> bool {
        let tx = self.channels.read().await.get(&session_id).cloned();
        let Some(tx) = tx else {
            return false;
        };
        deliver(session_id, &tx, frame)
    }

    /// Fan `base` out to the room. `exclude` filters recipients out;
    /// `transform` builds each recipient's frame. Returns frames queued.
    pub async fn send<T>(
        &self,
        room_id: RoomId,
        base: &WbCall,
        exclude: Option<&(dyn Fn(&Session) -> bool + Sync)>,
        transform: T,
    ) -> usize
    where
        T: Fn(&WbCall, &Session) -> Frame,
    {
        let members = self.registry.list_by_room(room_id).await;
        let targets: Vec<(Session, mpsc::Sender<Frame>)> = {
            let channels = self.channels.read().await;
            members
                .into_iter()
                .filter(|s| !exclude.is_some_and(|skip| skip(s)))
                .filter_map(|s| channels.get(&s.id).cloned().map(|tx| (s, tx)))
                .collect()
        };

        let mut delivered = 0;
        for (session, tx) in &targets {
            let frame = transform(base, session);
            if deliver(session.id, tx, frame) {
                delivered += 1;
            }
        }
        debug!(room_id, method = base.method.as_str(), targets = targets.len(), delivered, "wb broadcast");
        delivered
    }

    /// Fan out to an audience with a per-recipient transform.
    pub async fn send_to_audience<T>(&self, room_id: RoomId, base: &WbCall, audience: &Audience, transform: T) -> usize
    where
        T: Fn(&WbCall, &Session) -> Frame,
    {
        match audience {
            Audience::All => self.send(room_id, base, None, transform).await,
            Audience::Others(token) => {
                let skip: &(dyn Fn(&Session) -> bool + Sync) = &|s: &Session| s.token == *token;
                self.send(room_id, base, Some(skip), transform).await
            }
        }
    }

    /// Same frame to every member, originator included.
    pub async fn send_all(&self, room_id: RoomId, call: &WbCall) -> usize {
        self.send(room_id, call, None, |c, _| Frame::wb(c)).await
    }

    /// Same frame to every member except the originator's identity.
    pub async fn send_others(&self, room_id: RoomId, originator_token: &str, call: &WbCall) -> usize {
        let skip: &(dyn Fn(&Session) -> bool + Sync) = &|s: &Session| s.token == originator_token;
        self.send(room_id, call, Some(skip), |c, _| Frame::wb(c)).await
    }
}

fn deliver(session_id: SessionId, tx: &mpsc::Sender<Frame>, frame: Frame) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(session_id, "outbound channel full; frame dropped");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(session_id, "outbound channel closed; frame dropped");
            false
        }
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
