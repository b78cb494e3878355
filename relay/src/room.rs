//! The room registry and per-room routing state.
//!
//! The registry is a concurrent map behind a short-critical-section lock;
//! each room record has its own lock protecting the participant map and
//! heartbeat timestamp. Per-connection send queues are bounded mpsc
//! channels drained by one writer task each. Nothing in here ever sees
//! plaintext or keys - payloads are opaque strings copied between queues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rooms_protocol::core::HEARTBEAT_TIMEOUT;
use rooms_protocol::transport::WireMessage;

use crate::invite::InviteStore;
use crate::metrics::{RelayMetrics, SharedMetrics};

/// Depth of each per-connection send queue.
pub(crate) const SEND_QUEUE_DEPTH: usize = 256;

/// Registry-level admission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    /// A live host already owns this room id.
    #[error("room already exists")]
    RoomExists,
    /// Server-wide room cap reached.
    #[error("server at capacity")]
    ServerAtCapacity,
    /// No such room.
    #[error("room not found")]
    RoomNotFound,
    /// The host has not yet sent `ROOM_OPEN`.
    #[error("room not open")]
    RoomNotOpen,
    /// Per-room participant cap reached.
    #[error("room full")]
    RoomFull,
}

/// A queued delivery handle for one connection.
#[derive(Debug, Clone)]
pub struct Peer {
    tx: mpsc::Sender<WireMessage>,
}

impl Peer {
    /// Wrap a send queue.
    pub fn new(tx: mpsc::Sender<WireMessage>) -> Self {
        Self { tx }
    }

    /// Queue a frame without blocking.
    ///
    /// Droppable frames vanish on overflow; control frames report failure
    /// so the caller can close the connection.
    pub fn deliver(&self, message: WireMessage) -> bool {
        let control = message.is_control();
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(_) if !control => {
                debug!("peer queue full, dropped relayed frame");
                true
            }
            Err(_) => false,
        }
    }
}

#[derive(Debug)]
struct RoomInner {
    open: bool,
    last_heartbeat: Instant,
    host: Peer,
    participants: HashMap<String, Peer>,
    destroyed: bool,
}

/// One live room.
#[derive(Debug)]
pub struct Room {
    /// Canonical room id text.
    pub room_id: String,
    created_at: Instant,
    inner: Mutex<RoomInner>,
}

impl Room {
    fn new(room_id: String, host: Peer) -> Self {
        Self {
            room_id,
            created_at: Instant::now(),
            inner: Mutex::new(RoomInner {
                open: false,
                last_heartbeat: Instant::now(),
                host,
                participants: HashMap::new(),
                destroyed: false,
            }),
        }
    }

    /// Age of the room.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Mark the room open for joins.
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Whether joins are admitted.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Record host liveness (any host traffic counts).
    pub fn touch_heartbeat(&self) {
        self.lock().last_heartbeat = Instant::now();
    }

    /// Whether the host has been silent past the timeout.
    pub fn heartbeat_expired(&self) -> bool {
        self.lock().last_heartbeat.elapsed() > HEARTBEAT_TIMEOUT
    }

    /// Number of participants.
    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// Queue a frame to the host.
    pub fn deliver_to_host(&self, message: WireMessage) -> bool {
        let host = self.lock().host.clone();
        host.deliver(message)
    }

    /// Queue a frame to one participant.
    pub fn deliver_to_participant(&self, client_id: &str, message: WireMessage) -> bool {
        let Some(peer) = self.lock().participants.get(client_id).cloned() else {
            return false;
        };
        peer.deliver(message)
    }

    /// Fan a frame out to every participant except `exclude`. Returns the
    /// recipient count.
    pub fn fan_out(&self, message: &WireMessage, exclude: Option<&str>) -> u64 {
        let peers: Vec<Peer> = {
            let inner = self.lock();
            inner
                .participants
                .iter()
                .filter(|(id, _)| exclude != Some(id.as_str()))
                .map(|(_, peer)| peer.clone())
                .collect()
        };
        let mut delivered = 0;
        for peer in peers {
            if peer.deliver(message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Insert a participant, enforcing the per-room cap.
    pub fn add_participant(
        &self,
        client_id: String,
        peer: Peer,
        max_clients: usize,
    ) -> Result<(), AdmitError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(AdmitError::RoomNotOpen);
        }
        if inner.participants.len() >= max_clients {
            return Err(AdmitError::RoomFull);
        }
        inner.participants.insert(client_id, peer);
        Ok(())
    }

    /// Remove a participant; returns whether it was present.
    pub fn remove_participant(&self, client_id: &str) -> bool {
        self.lock().participants.remove(client_id).is_some()
    }

    /// Close out the room: flag it destroyed and notify every participant.
    /// Dropping the peer handles lets each writer drain and close its
    /// socket. Idempotent.
    fn destroy(&self, reason: &str) {
        let mut inner = self.lock();
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        let notice = WireMessage::RoomDestroyed {
            reason: reason.to_string(),
        };
        for peer in inner.participants.values() {
            let _ = peer.deliver(notice.clone());
        }
        inner.participants.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RoomInner> {
        self.inner.lock().expect("room lock poisoned")
    }
}

/// Generate a 16-byte CSPRNG relay client id (hex text).
///
/// Relay-assigned ids must not be linkable to identity or wall clock, so
/// this is drawn from the OS CSPRNG, never from timestamps.
pub fn generate_client_id() -> String {
    let mut raw = [0u8; 16];
    OsRng.fill_bytes(&mut raw);
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

/// The server-wide room registry.
#[derive(Debug)]
pub struct Registry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    max_rooms: usize,
    max_clients_per_room: usize,
    invites: Arc<InviteStore>,
    metrics: SharedMetrics,
}

impl Registry {
    /// A registry with the given capacity bounds.
    pub fn new(
        max_rooms: usize,
        max_clients_per_room: usize,
        invites: Arc<InviteStore>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            max_rooms,
            max_clients_per_room,
            invites,
            metrics,
        }
    }

    /// Per-room participant cap.
    pub fn max_clients_per_room(&self) -> usize {
        self.max_clients_per_room
    }

    /// Register a room for a connecting host.
    pub fn create_room(&self, room_id: &str, host: Peer) -> Result<Arc<Room>, AdmitError> {
        let mut rooms = self.rooms.lock().expect("registry lock poisoned");
        if rooms.contains_key(room_id) {
            return Err(AdmitError::RoomExists);
        }
        if rooms.len() >= self.max_rooms {
            return Err(AdmitError::ServerAtCapacity);
        }
        let room = Arc::new(Room::new(room_id.to_string(), host));
        rooms.insert(room_id.to_string(), room.clone());
        RelayMetrics::inc(&self.metrics.rooms_created);
        Ok(room)
    }

    /// Resolve a room.
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms
            .lock()
            .expect("registry lock poisoned")
            .get(room_id)
            .cloned()
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.lock().expect("registry lock poisoned").len()
    }

    /// Whether no rooms are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy a room: remove it from the registry, revoke its invite
    /// tokens, notify and release every participant queue.
    pub fn destroy_room(&self, room_id: &str, reason: &str) {
        let room = {
            let mut rooms = self.rooms.lock().expect("registry lock poisoned");
            rooms.remove(room_id)
        };
        let Some(room) = room else {
            return;
        };
        let revoked = self.invites.revoke_room(room_id);
        if revoked > 0 {
            debug!("revoked {revoked} invite tokens with the room");
        }
        room.destroy(reason);
        RelayMetrics::inc(&self.metrics.rooms_destroyed);
        debug!("room destroyed ({reason}) after {:?}", room.age());
    }

    /// Destroy every room (relay shutdown).
    pub fn destroy_all(&self, reason: &str) {
        let room_ids: Vec<String> = {
            let rooms = self.rooms.lock().expect("registry lock poisoned");
            rooms.keys().cloned().collect()
        };
        if !room_ids.is_empty() {
            warn!("destroying {} rooms ({reason})", room_ids.len());
        }
        for room_id in room_ids {
            self.destroy_room(&room_id, reason);
        }
    }
}

/// Validate a room id from the URL path: exactly 43 URL-safe base64 chars.
pub fn valid_room_id(room_id: &str) -> bool {
    room_id.len() == rooms_protocol::core::ROOM_ID_TEXT_LEN
        && room_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
