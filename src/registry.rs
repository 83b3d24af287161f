//! Session registry: the single source of truth for which rooms exist, who
//! is in them, and how to reach them.
//!
//! The registry is a mechanical store. Game policy (max players, phase
//! guards) lives in the orchestrator; the registry only tracks identity,
//! tokens, and connection handles. It is an injectable object with no
//! global state, so tests construct an isolated instance per case.
//!
//! Time is passed in as [`Instant`] arguments so the reconnection-window
//! and expiry boundaries are deterministic under test.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{GameError, Result};
use crate::ids;
use crate::protocol::{PlayerId, ServerFrame};

/// Outbound half of a connection. The transport layer owns the receiving
/// half and drains it onto the socket.
pub type ConnectionHandle = mpsc::UnboundedSender<ServerFrame>;

/// Registry wrapped for shared use: structural edits serialize behind the
/// write lock while cross-room reads stay concurrent.
pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

/// Grace period after a disconnect during which the same player id + token
/// pair may re-attach.
pub const RECONNECT_WINDOW: Duration = Duration::from_secs(30);

/// Age past which a room with no attached host is reclaimed.
pub const ROOM_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Cadence of the background reaper.
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

// ── Connection state ────────────────────────────────────────────────

/// Connection state of a host or player record.
///
/// An explicit union rather than a nullable handle, so "is this
/// participant currently reachable" is a first-class query.
#[derive(Debug, Clone)]
pub enum Link {
    /// A live connection the registry can deliver frames to.
    Attached(ConnectionHandle),
    /// No connection. `since` is `None` only for records that have never
    /// been attached.
    Detached { since: Option<Instant> },
}

impl Link {
    fn new() -> Self {
        Self::Detached { since: None }
    }

    /// Whether a connection is currently attached.
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached(_))
    }

    /// The handle, if attached.
    pub fn handle(&self) -> Option<&ConnectionHandle> {
        match self {
            Self::Attached(handle) => Some(handle),
            Self::Detached { .. } => None,
        }
    }

    /// When the connection was lost, if it ever existed.
    pub fn detached_since(&self) -> Option<Instant> {
        match self {
            Self::Attached(_) => None,
            Self::Detached { since } => *since,
        }
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// One player's membership record. Deleted only by explicit removal (room
/// teardown), never by disconnection alone.
#[derive(Debug)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    reconnect_token: String,
    pub link: Link,
}

/// One live room.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    host_token: String,
    pub host_link: Link,
    pub players: HashMap<PlayerId, PlayerRecord>,
    pub created_at: Instant,
}

/// Addressable side of a room connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Host,
    Player(PlayerId),
}

/// Read-only enumeration of the handles a broadcast should reach.
#[derive(Debug, Default)]
pub struct BroadcastTargets {
    pub host: Option<ConnectionHandle>,
    pub players: Vec<(PlayerId, ConnectionHandle)>,
}

// ── Registry ────────────────────────────────────────────────────────

/// Tracks every live room and its connections.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    rooms: HashMap<String, Room>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the registry for shared use across tasks.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Allocate a fresh room and return `(code, host_token)`.
    ///
    /// Codes are unique among live rooms; generation retries on collision.
    pub fn create_room(&mut self, now: Instant) -> (String, String) {
        let mut rng = rand::thread_rng();
        let mut code = ids::room_code(&mut rng);
        while self.rooms.contains_key(&code) {
            code = ids::room_code(&mut rng);
        }
        let host_token = ids::bearer_token(&mut rng);

        self.rooms.insert(
            code.clone(),
            Room {
                code: code.clone(),
                host_token: host_token.clone(),
                host_link: Link::new(),
                players: HashMap::new(),
                created_at: now,
            },
        );
        debug!(%code, "room created");
        (code, host_token)
    }

    /// Look up a room. Codes are case-insensitive.
    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(&normalize(code))
    }

    fn room_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(&normalize(code))
    }

    /// True iff the room exists and the host token matches exactly.
    pub fn validate_host_token(&self, code: &str, token: &str) -> bool {
        self.room(code).is_some_and(|room| room.host_token == token)
    }

    /// Add a player record to a room. Returns `None` when the room does
    /// not exist.
    ///
    /// The registry does not enforce the max-player policy; that guard
    /// belongs to the orchestrator's join handling.
    pub fn add_player(&mut self, code: &str, name: &str) -> Option<(PlayerId, String)> {
        let room = self.room_mut(code)?;
        let mut rng = rand::thread_rng();
        let id = ids::player_id();
        let reconnect_token = ids::bearer_token(&mut rng);
        room.players.insert(
            id,
            PlayerRecord {
                id,
                name: name.to_owned(),
                reconnect_token: reconnect_token.clone(),
                link: Link::new(),
            },
        );
        Some((id, reconnect_token))
    }

    /// Validate a reconnection attempt.
    ///
    /// Succeeds iff the room and player exist, the token matches exactly,
    /// and the player either was never disconnected or is still within the
    /// grace window. The boundary is inclusive: `elapsed == window` is
    /// still valid.
    pub fn reconnect_player(
        &self,
        code: &str,
        player_id: PlayerId,
        token: &str,
        now: Instant,
    ) -> Result<()> {
        let room = self.room(code).ok_or(GameError::RoomNotFound)?;
        let player = room
            .players
            .get(&player_id)
            .ok_or(GameError::PlayerNotFound)?;
        if player.reconnect_token != token {
            return Err(GameError::Unauthorized);
        }
        if let Some(since) = player.link.detached_since() {
            let elapsed = now.saturating_duration_since(since);
            if elapsed > RECONNECT_WINDOW {
                return Err(GameError::ExpiredReconnect);
            }
        }
        Ok(())
    }

    /// Associate a connection handle with the host or a player.
    ///
    /// Attaching a player clears their disconnection timestamp.
    pub fn attach_socket(
        &mut self,
        code: &str,
        endpoint: Endpoint,
        handle: ConnectionHandle,
    ) -> Result<()> {
        let room = self.room_mut(code).ok_or(GameError::RoomNotFound)?;
        match endpoint {
            Endpoint::Host => room.host_link = Link::Attached(handle),
            Endpoint::Player(id) => {
                let player = room.players.get_mut(&id).ok_or(GameError::PlayerNotFound)?;
                player.link = Link::Attached(handle);
            }
        }
        Ok(())
    }

    /// Clear a connection handle. Detaching a player starts their
    /// reconnection grace window at `now`.
    pub fn detach_socket(&mut self, code: &str, endpoint: Endpoint, now: Instant) -> Result<()> {
        let room = self.room_mut(code).ok_or(GameError::RoomNotFound)?;
        match endpoint {
            Endpoint::Host => room.host_link = Link::Detached { since: Some(now) },
            Endpoint::Player(id) => {
                let player = room.players.get_mut(&id).ok_or(GameError::PlayerNotFound)?;
                player.link = Link::Detached { since: Some(now) };
            }
        }
        Ok(())
    }

    /// Enumerate the attached handles a broadcast should reach.
    pub fn broadcast_targets(&self, code: &str) -> Option<BroadcastTargets> {
        let room = self.room(code)?;
        Some(BroadcastTargets {
            host: room.host_link.handle().cloned(),
            players: room
                .players
                .values()
                .filter_map(|p| p.link.handle().cloned().map(|h| (p.id, h)))
                .collect(),
        })
    }

    /// The attached handle for a single endpoint, if any.
    pub fn handle_for(&self, code: &str, endpoint: Endpoint) -> Option<ConnectionHandle> {
        let room = self.room(code)?;
        match endpoint {
            Endpoint::Host => room.host_link.handle().cloned(),
            Endpoint::Player(id) => room.players.get(&id)?.link.handle().cloned(),
        }
    }

    /// Delete a room and all its player records.
    pub fn remove_room(&mut self, code: &str) {
        if self.rooms.remove(&normalize(code)).is_some() {
            debug!(code = %normalize(code), "room removed");
        }
    }

    /// Remove a single player record (orchestrator discretion, e.g. a
    /// stale record past the grace window).
    pub fn remove_player(&mut self, code: &str, player_id: PlayerId) {
        if let Some(room) = self.room_mut(code) {
            room.players.remove(&player_id);
        }
    }

    /// Background housekeeping: delete rooms with no attached host whose
    /// age exceeds the expiry. Returns the number reclaimed.
    ///
    /// Not correctness-critical; may race harmlessly with a host
    /// reconnecting just past expiry.
    pub fn reap_expired_rooms(&mut self, now: Instant) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, room| {
            room.host_link.is_attached()
                || now.saturating_duration_since(room.created_at) <= ROOM_EXPIRY
        });
        let reaped = before - self.rooms.len();
        if reaped > 0 {
            debug!(reaped, "expired rooms reclaimed");
        }
        reaped
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

fn normalize(code: &str) -> String {
    code.to_ascii_uppercase()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerFrame>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn created_codes_are_unique_among_live_rooms() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let codes: HashSet<String> = (0..200)
            .map(|_| registry.create_room(now).0)
            .collect();
        assert_eq!(codes.len(), 200);
        assert_eq!(registry.room_count(), 200);
    }

    #[test]
    fn host_token_validates_exactly() {
        let mut registry = SessionRegistry::new();
        let (code, token) = registry.create_room(Instant::now());
        assert!(registry.validate_host_token(&code, &token));
        assert!(!registry.validate_host_token(&code, "nope"));
        assert!(!registry.validate_host_token("ZZZZ", &token));
        // Case-insensitive room lookup, exact token match.
        assert!(registry.validate_host_token(&code.to_ascii_lowercase(), &token));
    }

    #[test]
    fn add_player_fails_for_unknown_room() {
        let mut registry = SessionRegistry::new();
        assert!(registry.add_player("QQQQ", "Ada").is_none());
    }

    #[test]
    fn fresh_player_reconnects_within_window_trivially() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let (code, _) = registry.create_room(now);
        let (id, token) = registry.add_player(&code, "Ada").unwrap();
        // Never attached, never disconnected: token alone decides.
        assert!(registry.reconnect_player(&code, id, &token, now).is_ok());
        assert!(matches!(
            registry.reconnect_player(&code, id, "bad", now),
            Err(GameError::Unauthorized)
        ));
    }

    #[test]
    fn reconnect_window_boundary_is_inclusive() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();
        let (code, _) = registry.create_room(start);
        let (id, token) = registry.add_player(&code, "Ada").unwrap();
        let (tx, _rx) = handle();
        registry
            .attach_socket(&code, Endpoint::Player(id), tx)
            .unwrap();
        registry
            .detach_socket(&code, Endpoint::Player(id), start)
            .unwrap();

        let at_boundary = start + RECONNECT_WINDOW;
        assert!(registry
            .reconnect_player(&code, id, &token, at_boundary)
            .is_ok());

        let past_boundary = at_boundary + Duration::from_millis(1);
        assert!(matches!(
            registry.reconnect_player(&code, id, &token, past_boundary),
            Err(GameError::ExpiredReconnect)
        ));
    }

    #[test]
    fn attach_clears_disconnection_state() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let (code, _) = registry.create_room(now);
        let (id, _) = registry.add_player(&code, "Ada").unwrap();

        let (tx, _rx) = handle();
        registry
            .attach_socket(&code, Endpoint::Player(id), tx)
            .unwrap();
        let player = &registry.room(&code).unwrap().players[&id];
        assert!(player.link.is_attached());
        assert!(player.link.detached_since().is_none());

        registry
            .detach_socket(&code, Endpoint::Player(id), now)
            .unwrap();
        let player = &registry.room(&code).unwrap().players[&id];
        assert!(!player.link.is_attached());
        assert_eq!(player.link.detached_since(), Some(now));

        let (tx, _rx) = handle();
        registry
            .attach_socket(&code, Endpoint::Player(id), tx)
            .unwrap();
        let player = &registry.room(&code).unwrap().players[&id];
        assert!(player.link.detached_since().is_none());
    }

    #[test]
    fn broadcast_targets_enumerate_attached_handles_only() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let (code, _) = registry.create_room(now);
        let (a, _) = registry.add_player(&code, "Ada").unwrap();
        let (b, _) = registry.add_player(&code, "Brin").unwrap();
        let (_c, _) = registry.add_player(&code, "Cleo").unwrap();

        let (host_tx, _host_rx) = handle();
        registry.attach_socket(&code, Endpoint::Host, host_tx).unwrap();
        let (a_tx, _a_rx) = handle();
        registry.attach_socket(&code, Endpoint::Player(a), a_tx).unwrap();
        let (b_tx, _b_rx) = handle();
        registry.attach_socket(&code, Endpoint::Player(b), b_tx).unwrap();
        registry.detach_socket(&code, Endpoint::Player(b), now).unwrap();

        let targets = registry.broadcast_targets(&code).unwrap();
        assert!(targets.host.is_some());
        let ids: Vec<PlayerId> = targets.players.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![a]);
    }

    #[test]
    fn reaper_removes_only_hostless_expired_rooms() {
        let mut registry = SessionRegistry::new();
        let start = Instant::now();

        let (expired, _) = registry.create_room(start);
        let (hosted, _) = registry.create_room(start);
        let late = start + ROOM_EXPIRY + Duration::from_secs(1);
        let (young, _) = registry.create_room(late);

        let (host_tx, _host_rx) = handle();
        registry
            .attach_socket(&hosted, Endpoint::Host, host_tx)
            .unwrap();

        let reaped = registry.reap_expired_rooms(late);
        assert_eq!(reaped, 1);
        assert!(registry.room(&expired).is_none());
        assert!(registry.room(&hosted).is_some());
        assert!(registry.room(&young).is_some());
    }

    #[test]
    fn removed_player_cannot_reconnect() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let (code, _) = registry.create_room(now);
        let (id, token) = registry.add_player(&code, "Ada").unwrap();
        registry.remove_player(&code, id);
        assert!(matches!(
            registry.reconnect_player(&code, id, &token, now),
            Err(GameError::PlayerNotFound)
        ));
    }

    #[test]
    fn remove_room_deletes_player_records() {
        let mut registry = SessionRegistry::new();
        let (code, _) = registry.create_room(Instant::now());
        registry.add_player(&code, "Ada").unwrap();
        registry.remove_room(&code);
        assert!(registry.room(&code).is_none());
    }
}
