//! Session registry — who is attached to which room, on which server.
//!
//! DESIGN
//! ======
//! Sessions are partitioned by owning server (`None` = the local node).
//! Each partition indexes its primary sessions by identity token, so
//! `get_by_token` is a direct lookup. There is deliberately no global token
//! index: `get_by_token_any_server` is a linear scan over every partition,
//! O(total sessions), and is the slow fallback for cross-server lookups.
//!
//! A participant may have two records sharing one identity token: the
//! primary session (profile, rights, whiteboard channel) and a transport
//! sub-session for the audio/video connection. `update` keeps their shared
//! fields (rights, room, AV flags) in sync.
//!
//! Lookups of unknown ids or tokens return `None`/`NotFound`, never an error.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub type SessionId = i64;
pub type RoomId = i64;
pub type ServerId = String;

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Random 16-byte hex identity token for clients that connect without one.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

// =============================================================================
// TYPES
// =============================================================================

/// Capability granted to a participant inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Right {
    Presenter,
    #[serde(rename = "whiteBoard", alias = "whiteboard")]
    Whiteboard,
    Moderator,
    Audio,
    Video,
    Share,
}

impl Right {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "presenter" => Some(Self::Presenter),
            "whiteboard" => Some(Self::Whiteboard),
            "moderator" => Some(Self::Moderator),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "share" => Some(Self::Share),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Full participant session; owns the whiteboard channel.
    Primary,
    /// Audio/video sub-session sharing the primary's identity token.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Identity token, stable across reconnects.
    pub token: String,
    pub server: Option<ServerId>,
    pub room_id: Option<RoomId>,
    pub rights: BTreeSet<Right>,
    pub recording: bool,
    pub publishing: bool,
    pub language_id: i64,
    pub kind: SessionKind,
    pub user_name: String,
    /// Milliseconds since Unix epoch.
    pub connected_at: i64,
}

impl Session {
    /// New unregistered primary session. The registry assigns the id on `add`.
    pub fn new(token: impl Into<String>, room_id: Option<RoomId>) -> Self {
        Self {
            id: 0,
            token: token.into(),
            server: None,
            room_id,
            rights: BTreeSet::new(),
            recording: false,
            publishing: false,
            language_id: 1,
            kind: SessionKind::Primary,
            user_name: String::new(),
            connected_at: crate::services::now_ms(),
        }
    }

    #[must_use]
    pub fn with_rights(mut self, rights: impl IntoIterator<Item = Right>) -> Self {
        self.rights = rights.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_server(mut self, server: Option<ServerId>) -> Self {
        self.server = server;
        self
    }

    #[must_use]
    pub fn with_language(mut self, language_id: i64) -> Self {
        self.language_id = language_id;
        self
    }

    #[must_use]
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    /// Transport sub-session mirroring this participant's shared fields.
    #[must_use]
    pub fn transport_of(primary: &Session) -> Self {
        Self { id: 0, kind: SessionKind::Transport, ..primary.clone() }
    }

    #[must_use]
    pub fn has_right(&self, right: Right) -> bool {
        self.rights.contains(&right)
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        self.kind == SessionKind::Transport
    }

    /// Copy the mutable fields of `src`. Returns whether anything changed.
    fn apply(&mut self, src: &Session) -> bool {
        let changed = self.language_id != src.language_id || self.user_name != src.user_name;
        self.language_id = src.language_id;
        self.user_name.clone_from(&src.user_name);
        self.merge_shared(src) || changed
    }

    /// Copy fields shared between a primary and its transport sub-session.
    fn merge_shared(&mut self, src: &Session) -> bool {
        let changed = self.rights != src.rights
            || self.room_id != src.room_id
            || self.recording != src.recording
            || self.publishing != src.publishing;
        self.rights.clone_from(&src.rights);
        self.room_id = src.room_id;
        self.recording = src.recording;
        self.publishing = src.publishing;
        changed
    }
}

/// Result of a cross-server token lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenLookup {
    NotFound,
    Found { session: Session, server: Option<ServerId> },
    /// The token is live on more than one server. `first` is the match from
    /// the lowest server key; callers decide whether that is acceptable.
    Ambiguous { first: Session, servers: Vec<Option<ServerId>> },
}

/// Sort key for administrative paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionOrder {
    #[default]
    Id,
    Token,
    Room,
    Server,
    ConnectedAt,
    UserName,
}

impl SessionOrder {
    /// Parse an order-by column name. Unknown names fall back to `Id`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "token" | "uid" => Self::Token,
            "room" | "roomId" | "room_id" => Self::Room,
            "server" => Self::Server,
            "connectedAt" | "connected_at" | "connected" => Self::ConnectedAt,
            "userName" | "user_name" | "name" => Self::UserName,
            _ => Self::Id,
        }
    }

    fn compare(self, a: &Session, b: &Session) -> Ordering {
        match self {
            Self::Id => a.id.cmp(&b.id),
            Self::Token => a.token.cmp(&b.token),
            Self::Room => a.room_id.cmp(&b.room_id),
            Self::Server => a.server.cmp(&b.server),
            Self::ConnectedAt => a.connected_at.cmp(&b.connected_at),
            Self::UserName => a.user_name.cmp(&b.user_name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub total: usize,
    pub records: Vec<Session>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatistics {
    pub sessions: usize,
    pub transport_sessions: usize,
    pub rooms: usize,
    /// Session count per server; the local node is keyed `"local"`.
    pub servers: BTreeMap<String, usize>,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
struct Partition {
    sessions: BTreeMap<SessionId, Session>,
    /// Identity token -> primary session id.
    primaries: HashMap<String, SessionId>,
}

impl Partition {
    fn primary_by_token(&self, token: &str) -> Option<&Session> {
        self.primaries
            .get(token)
            .and_then(|id| self.sessions.get(id))
    }

    fn reindex_token(&mut self, token: &str) {
        let next = self
            .sessions
            .values()
            .filter(|s| s.token == token && !s.is_transport())
            .map(|s| s.id)
            .next_back();
        match next {
            Some(id) => {
                self.primaries.insert(token.to_string(), id);
            }
            None => {
                self.primaries.remove(token);
            }
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    partitions: BTreeMap<Option<ServerId>, Partition>,
    locations: HashMap<SessionId, Option<ServerId>>,
    next_id: SessionId,
}

impl RegistryInner {
    fn all(&self) -> impl Iterator<Item = &Session> {
        self.partitions.values().flat_map(|p| p.sessions.values())
    }

    fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        let server = self.locations.get(&id)?;
        self.partitions.get_mut(server)?.sessions.get_mut(&id)
    }
}

/// Registry of connected participant sessions, partitioned by server.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process start hook: nothing survives a restart, so the registry is cleared.
    pub async fn on_start(&self) {
        self.clear().await;
        info!("session registry started");
    }

    /// Drop all in-memory session state. Ids keep increasing across clears.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.locations.len();
        inner.partitions.clear();
        inner.locations.clear();
        info!(dropped, "session registry cleared");
    }

    /// Store a new session and return the stored record with its assigned id.
    pub async fn add(&self, mut session: Session) -> Session {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        session.id = inner.next_id;

        let partition = inner.partitions.entry(session.server.clone()).or_default();
        if !session.is_transport() {
            partition.primaries.insert(session.token.clone(), session.id);
        }
        partition.sessions.insert(session.id, session.clone());
        inner.locations.insert(session.id, session.server.clone());

        info!(session_id = session.id, room_id = ?session.room_id, server = ?session.server, kind = ?session.kind, "session added");
        session
    }

    pub async fn get(&self, id: SessionId) -> Option<Session> {
        let inner = self.inner.read().await;
        let server = inner.locations.get(&id)?;
        inner.partitions.get(server)?.sessions.get(&id).cloned()
    }

    /// Primary session for an identity token on one specific server.
    pub async fn get_by_token(&self, token: &str, server: Option<&str>) -> Option<Session> {
        let inner = self.inner.read().await;
        let key = server.map(str::to_string);
        inner
            .partitions
            .get(&key)?
            .primary_by_token(token)
            .cloned()
    }

    /// Find an identity token on any server. Linear in the total session count.
    pub async fn get_by_token_any_server(&self, token: &str) -> TokenLookup {
        let inner = self.inner.read().await;
        let mut matches: Vec<(Option<ServerId>, Session)> = Vec::new();
        for (server, partition) in &inner.partitions {
            let hit = partition.primary_by_token(token).or_else(|| {
                partition
                    .sessions
                    .values()
                    .find(|s| s.token == token)
            });
            if let Some(session) = hit {
                matches.push((server.clone(), session.clone()));
            }
        }
        drop(inner);

        let mut iter = matches.into_iter();
        let Some((server, session)) = iter.next() else {
            return TokenLookup::NotFound;
        };
        let rest: Vec<Option<ServerId>> = iter.map(|(s, _)| s).collect();
        if rest.is_empty() {
            return TokenLookup::Found { session, server };
        }
        let mut servers = vec![server];
        servers.extend(rest);
        warn!(token, ?servers, "identity token live on several servers");
        TokenLookup::Ambiguous { first: session, servers }
    }

    /// Merge mutable fields into the stored record and every record sharing
    /// its identity token. Returns whether anything changed.
    pub async fn update(&self, session: &Session) -> bool {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.get_mut(session.id) else {
            return false;
        };
        let mut changed = current.apply(session);
        let canonical = current.clone();

        for partition in inner.partitions.values_mut() {
            for sibling in partition
                .sessions
                .values_mut()
                .filter(|s| s.token == canonical.token && s.id != canonical.id)
            {
                changed |= sibling.merge_shared(&canonical);
            }
        }

        if changed {
            info!(session_id = session.id, room_id = ?canonical.room_id, "session updated");
        }
        changed
    }

    /// Remove a single session. Idempotent.
    pub async fn remove(&self, id: SessionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(server) = inner.locations.remove(&id) else {
            return false;
        };
        let Some(partition) = inner.partitions.get_mut(&server) else {
            return false;
        };
        let Some(removed) = partition.sessions.remove(&id) else {
            return false;
        };
        if partition.primaries.get(&removed.token) == Some(&id) {
            partition.reindex_token(&removed.token);
        }
        if partition.sessions.is_empty() {
            inner.partitions.remove(&server);
        }
        info!(session_id = id, room_id = ?removed.room_id, "session removed");
        true
    }

    /// Remove a primary session, plus its transport sub-sessions when no
    /// other primary with the same token remains. Returns removed ids.
    pub async fn remove_participant(&self, id: SessionId) -> Vec<SessionId> {
        let Some(session) = self.get(id).await else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        if self.remove(id).await {
            removed.push(id);
        }
        if self
            .get_by_token(&session.token, session.server.as_deref())
            .await
            .is_some()
        {
            return removed;
        }

        let orphans: Vec<SessionId> = {
            let inner = self.inner.read().await;
            inner
                .all()
                .filter(|s| s.token == session.token && s.is_transport())
                .map(|s| s.id)
                .collect()
        };
        for orphan in orphans {
            if self.remove(orphan).await {
                removed.push(orphan);
            }
        }
        removed
    }

    /// Primary sessions in a room, ordered by id.
    pub async fn list_by_room(&self, room_id: RoomId) -> Vec<Session> {
        self.collect_room(room_id, false).await
    }

    /// Primary and transport sessions in a room, ordered by id.
    pub async fn list_by_room_including_transient(&self, room_id: RoomId) -> Vec<Session> {
        self.collect_room(room_id, true).await
    }

    async fn collect_room(&self, room_id: RoomId, transient: bool) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut out: Vec<Session> = inner
            .all()
            .filter(|s| s.room_id == Some(room_id) && (transient || !s.is_transport()))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub async fn count_recording(&self, room_id: RoomId) -> usize {
        self.count_in_room(room_id, |s| s.recording).await
    }

    pub async fn count_publishing(&self, room_id: RoomId) -> usize {
        self.count_in_room(room_id, |s| s.publishing).await
    }

    async fn count_in_room(&self, room_id: RoomId, flag: impl Fn(&Session) -> bool) -> usize {
        let inner = self.inner.read().await;
        inner
            .all()
            .filter(|s| s.room_id == Some(room_id) && !s.is_transport() && flag(s))
            .count()
    }

    /// Distinct rooms populated on a server (`None` = local node), ascending.
    pub async fn active_room_ids(&self, server: Option<&str>) -> Vec<RoomId> {
        let inner = self.inner.read().await;
        let key = server.map(str::to_string);
        let Some(partition) = inner.partitions.get(&key) else {
            return Vec::new();
        };
        let rooms: BTreeSet<RoomId> = partition
            .sessions
            .values()
            .filter_map(|s| s.room_id)
            .collect();
        rooms.into_iter().collect()
    }

    /// Every session across all servers, ordered by server then id.
    pub async fn all(&self) -> Vec<Session> {
        self.inner.read().await.all().cloned().collect()
    }

    /// Stable page over all sessions. Ties are broken by ascending id.
    pub async fn page(&self, start: usize, max: usize, order: SessionOrder, ascending: bool) -> SearchResult {
        let mut all = self.all().await;
        all.sort_by(|a, b| {
            let by_key = order.compare(a, b);
            let by_key = if ascending { by_key } else { by_key.reverse() };
            by_key.then(a.id.cmp(&b.id))
        });
        let total = all.len();
        let records = all.into_iter().skip(start).take(max).collect();
        SearchResult { total, records }
    }

    pub async fn statistics(&self) -> SessionStatistics {
        let inner = self.inner.read().await;
        let mut stats = SessionStatistics::default();
        let mut rooms = BTreeSet::new();
        for (server, partition) in &inner.partitions {
            let label = server.clone().unwrap_or_else(|| "local".to_string());
            *stats.servers.entry(label).or_default() += partition.sessions.len();
            for session in partition.sessions.values() {
                if session.is_transport() {
                    stats.transport_sessions += 1;
                } else {
                    stats.sessions += 1;
                }
                if let Some(room) = session.room_id {
                    rooms.insert(room);
                }
            }
        }
        stats.rooms = rooms.len();
        stats
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
