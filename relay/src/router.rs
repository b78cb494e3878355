//! Connection handling and frame routing.
//!
//! Each accepted WebSocket gets a reader task (this module's handler
//! functions) and a writer task draining that connection's send queue;
//! every room additionally runs one heartbeat monitor. The relay never
//! inspects payloads - it copies opaque strings between queues and stamps
//! relay client ids on the way through.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rooms_protocol::core::HEARTBEAT_CHECK_INTERVAL;
use rooms_protocol::transport::{decode, encode, WireMessage};

use crate::invite::InviteStore;
use crate::metrics::{RelayMetrics, SharedMetrics};
use crate::ratelimit::RateLimiter;
use crate::room::{generate_client_id, AdmitError, Peer, Registry, Room, SEND_QUEUE_DEPTH};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The room registry.
    pub registry: Arc<Registry>,
    /// Invite token table.
    pub invites: Arc<InviteStore>,
    /// Counters.
    pub metrics: SharedMetrics,
    /// Per-IP connection admission limiter.
    pub conn_limiter: Arc<RateLimiter<IpAddr>>,
    /// Per-(room, client) message limiter.
    pub msg_limiter: Arc<RateLimiter<(String, String)>>,
}

impl AppState {
    /// Build the default state for the given capacity bounds.
    pub fn new(max_rooms: usize, max_clients_per_room: usize) -> Self {
        let invites = Arc::new(InviteStore::new());
        let metrics: SharedMetrics = Arc::new(RelayMetrics::new());
        Self {
            registry: Arc::new(Registry::new(
                max_rooms,
                max_clients_per_room,
                invites.clone(),
                metrics.clone(),
            )),
            invites,
            metrics,
            // 10-connection burst per IP, refilling one per second.
            conn_limiter: Arc::new(RateLimiter::new(1.0, 10.0)),
            // 30-message burst per (room, client), refilling ten per second.
            msg_limiter: Arc::new(RateLimiter::new(10.0, 30.0)),
        }
    }
}

fn error_frame(code: &str, message: &str) -> WireMessage {
    WireMessage::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

fn admit_error_frame(error: &AdmitError) -> WireMessage {
    let code = match error {
        AdmitError::RoomExists => "ROOM_EXISTS",
        AdmitError::ServerAtCapacity => "SERVER_AT_CAPACITY",
        AdmitError::RoomNotFound => "ROOM_NOT_FOUND",
        AdmitError::RoomNotOpen => "ROOM_NOT_OPEN",
        AdmitError::RoomFull => "ROOM_FULL",
    };
    error_frame(code, &error.to_string())
}

async fn send_direct(sink: &mut SplitSink<WebSocket, Message>, message: &WireMessage) {
    if let Ok(text) = encode(message) {
        let _ = sink.send(Message::Text(text.into())).await;
    }
}

/// Drain one connection's send queue into its socket. Ends when the queue
/// closes (all peer handles dropped) or the socket errors.
async fn writer_task(
    mut queue: mpsc::Receiver<WireMessage>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(message) = queue.recv().await {
        let Ok(text) = encode(&message) else {
            continue;
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Read the next parsed frame, skipping non-text traffic. `None` means the
/// connection is gone.
async fn next_frame(stream: &mut SplitStream<WebSocket>) -> Option<WireMessage> {
    loop {
        let message = stream.next().await?.ok()?;
        match message {
            Message::Text(text) => match decode(text.as_str()) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    debug!("dropping unparseable frame: {e}");
                }
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

// ── Host connections ─────────────────────────────────────────────────────

/// Run one host connection to completion.
pub async fn handle_host_socket(socket: WebSocket, state: AppState, room_id: String) {
    RelayMetrics::inc(&state.metrics.connections_total);
    let (mut sink, mut stream) = socket.split();

    let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let room = match state.registry.create_room(&room_id, Peer::new(queue_tx)) {
        Ok(room) => room,
        Err(error) => {
            send_direct(&mut sink, &admit_error_frame(&error)).await;
            let _ = sink.close().await;
            return;
        }
    };
    info!(room = %redact(&room_id), "host connected, room created");

    room.deliver_to_host(WireMessage::RoomCreated {
        room_id: room_id.clone(),
    });
    tokio::spawn(writer_task(queue_rx, sink));
    tokio::spawn(heartbeat_monitor(
        state.registry.clone(),
        room.clone(),
        room_id.clone(),
    ));

    while let Some(frame) = next_frame(&mut stream).await {
        if !route_host_frame(&state, &room, &room_id, frame) {
            break;
        }
    }

    // Host gone: the room dies with it. The heartbeat monitor and an
    // explicit ROOM_CLOSE both race here; destroy is idempotent.
    state.registry.destroy_room(&room_id, "heartbeat_timeout");
    info!(room = %redact(&room_id), "host connection closed");
}

/// Route one host frame. Returns `false` when the connection should end.
fn route_host_frame(
    state: &AppState,
    room: &Arc<Room>,
    room_id: &str,
    frame: WireMessage,
) -> bool {
    // Any host traffic proves liveness.
    room.touch_heartbeat();

    match frame {
        WireMessage::RoomOpen => {
            room.open();
            debug!(room = %redact(room_id), "room open for joins");
        }
        WireMessage::Heartbeat => {
            room.deliver_to_host(WireMessage::HeartbeatAck);
        }
        WireMessage::Broadcast { payload } => {
            let delivered = room.fan_out(
                &WireMessage::Message {
                    sender_id: None,
                    payload,
                },
                None,
            );
            RelayMetrics::add(&state.metrics.messages_relayed, delivered);
        }
        WireMessage::Direct { client_id, payload } => {
            if room.deliver_to_participant(
                &client_id,
                WireMessage::Message {
                    sender_id: None,
                    payload,
                },
            ) {
                RelayMetrics::inc(&state.metrics.messages_relayed);
            }
        }
        WireMessage::JoinResponse {
            client_id,
            approve,
            payload,
        } => {
            room.deliver_to_participant(
                &client_id,
                WireMessage::JoinResponse {
                    client_id: client_id.clone(),
                    approve,
                    payload,
                },
            );
            if !approve {
                // Rejection closes the participant's link; dropping the
                // peer lets its writer drain the rejection first.
                room.remove_participant(&client_id);
            }
        }
        WireMessage::Kick { client_id } => {
            room.deliver_to_participant(&client_id, WireMessage::Kicked);
            room.remove_participant(&client_id);
        }
        WireMessage::RoomClose => {
            state.registry.destroy_room(room_id, "host_closed");
            return false;
        }
        other => {
            debug!("unexpected host frame: {other:?}");
            room.deliver_to_host(error_frame("UNEXPECTED_FRAME", "frame not valid for hosts"));
        }
    }
    true
}

/// Destroy the room when the host goes silent past the timeout.
async fn heartbeat_monitor(registry: Arc<Registry>, room: Arc<Room>, room_id: String) {
    let mut tick = tokio::time::interval(HEARTBEAT_CHECK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        if registry.get(&room_id).is_none() {
            return;
        }
        if room.heartbeat_expired() {
            warn!(room = %redact(&room_id), "host heartbeat expired");
            registry.destroy_room(&room_id, "heartbeat_timeout");
            return;
        }
    }
}

// ── Client connections ───────────────────────────────────────────────────

/// Run one client connection to completion.
pub async fn handle_client_socket(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    token: Option<String>,
) {
    RelayMetrics::inc(&state.metrics.connections_total);
    let (mut sink, mut stream) = socket.split();

    let Some(room) = state.registry.get(&room_id) else {
        send_direct(&mut sink, &admit_error_frame(&AdmitError::RoomNotFound)).await;
        let _ = sink.close().await;
        return;
    };

    // Token consumption is atomic and advisory: a bad token is logged, but
    // host approval remains the only gate on membership.
    if let Some(token) = token {
        match state.invites.consume(&token, &room_id) {
            Ok(()) => debug!(room = %redact(&room_id), "invite token consumed"),
            Err(e) => warn!(room = %redact(&room_id), "invite token rejected: {e}"),
        }
    }

    let client_id = generate_client_id();
    let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let peer = Peer::new(queue_tx);
    if let Err(error) = room.add_participant(
        client_id.clone(),
        peer.clone(),
        state.registry.max_clients_per_room(),
    ) {
        send_direct(&mut sink, &admit_error_frame(&error)).await;
        let _ = sink.close().await;
        return;
    }

    peer.deliver(WireMessage::Connected {
        client_id: client_id.clone(),
    });
    tokio::spawn(writer_task(queue_rx, sink));
    debug!(room = %redact(&room_id), "client connected");

    while let Some(frame) = next_frame(&mut stream).await {
        if !route_client_frame(&state, &room, &room_id, &client_id, frame) {
            break;
        }
    }

    room.remove_participant(&client_id);
    room.deliver_to_host(WireMessage::ClientLeft { client_id });
}

/// Route one client frame. Returns `false` when the connection should end.
fn route_client_frame(
    state: &AppState,
    room: &Arc<Room>,
    room_id: &str,
    client_id: &str,
    frame: WireMessage,
) -> bool {
    match frame {
        WireMessage::JoinRequest { payload, .. } => {
            if !room.deliver_to_host(WireMessage::JoinRequest {
                client_id: Some(client_id.to_string()),
                payload,
            }) {
                return false;
            }
        }
        WireMessage::JoinConfirm { payload, .. } => {
            if !room.deliver_to_host(WireMessage::JoinConfirm {
                client_id: Some(client_id.to_string()),
                payload,
            }) {
                return false;
            }
        }
        WireMessage::Message { payload, .. } => {
            let key = (room_id.to_string(), client_id.to_string());
            if !state.msg_limiter.check(&key) {
                // Rate-limited messages are silently dropped.
                RelayMetrics::inc(&state.metrics.rate_limited_total);
                return true;
            }
            let mirrored = room.deliver_to_host(WireMessage::ClientMessage {
                client_id: client_id.to_string(),
                payload: payload.clone(),
            });
            let delivered = room.fan_out(
                &WireMessage::Message {
                    sender_id: Some(client_id.to_string()),
                    payload,
                },
                Some(client_id),
            );
            RelayMetrics::add(
                &state.metrics.messages_relayed,
                delivered + u64::from(mirrored),
            );
        }
        other => {
            debug!("unexpected client frame: {other:?}");
        }
    }
    true
}

/// Shorten a room id for log lines; the full id is a capability.
fn redact(room_id: &str) -> &str {
    room_id.get(..8).unwrap_or(room_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_error_codes() {
        for (error, code) in [
            (AdmitError::RoomExists, "ROOM_EXISTS"),
            (AdmitError::ServerAtCapacity, "SERVER_AT_CAPACITY"),
            (AdmitError::RoomNotFound, "ROOM_NOT_FOUND"),
            (AdmitError::RoomNotOpen, "ROOM_NOT_OPEN"),
            (AdmitError::RoomFull, "ROOM_FULL"),
        ] {
            match admit_error_frame(&error) {
                WireMessage::Error { code: c, .. } => assert_eq!(c, code),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_host_broadcast_fans_out_verbatim() {
        // Relay blindness: the payload string reaches each peer byte-equal.
        let state = AppState::new(16, 8);
        let (host_tx, _host_rx) = mpsc::channel(8);
        let room = state
            .registry
            .create_room(&"r".repeat(43), Peer::new(host_tx))
            .unwrap();
        room.open();

        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        room.add_participant("a".into(), Peer::new(a_tx), 8).unwrap();
        room.add_participant("b".into(), Peer::new(b_tx), 8).unwrap();

        let opaque = "c2VhbGVkLWZyYW1lLWJ5dGVz";
        assert!(route_host_frame(
            &state,
            &room,
            &"r".repeat(43),
            WireMessage::Broadcast {
                payload: opaque.into()
            },
        ));

        for rx in [&mut a_rx, &mut b_rx] {
            match rx.try_recv().unwrap() {
                WireMessage::Message { sender_id, payload } => {
                    assert_eq!(sender_id, None);
                    assert_eq!(payload, opaque);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_client_message_mirrors_and_fans_out() {
        let state = AppState::new(16, 8);
        let (host_tx, mut host_rx) = mpsc::channel(8);
        let room = state
            .registry
            .create_room(&"r".repeat(43), Peer::new(host_tx))
            .unwrap();
        room.open();

        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        room.add_participant("a".into(), Peer::new(a_tx), 8).unwrap();
        room.add_participant("b".into(), Peer::new(b_tx), 8).unwrap();

        let opaque = "b3BhcXVlLXBheWxvYWQ=";
        assert!(route_client_frame(
            &state,
            &room,
            &"r".repeat(43),
            "a",
            WireMessage::Message {
                sender_id: None,
                payload: opaque.into()
            },
        ));

        // The host sees a mirrored CLIENT_MESSAGE.
        match host_rx.try_recv().unwrap() {
            WireMessage::ClientMessage { client_id, payload } => {
                assert_eq!(client_id, "a");
                assert_eq!(payload, opaque);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        // The other participant sees MESSAGE with the sender stamped.
        match b_rx.try_recv().unwrap() {
            WireMessage::Message { sender_id, payload } => {
                assert_eq!(sender_id.as_deref(), Some("a"));
                assert_eq!(payload, opaque);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        // The sender does not hear its own message back.
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rate_limited_messages_silently_dropped() {
        let state = AppState::new(16, 8);
        let (host_tx, mut host_rx) = mpsc::channel(64);
        let room_id = "r".repeat(43);
        let room = state
            .registry
            .create_room(&room_id, Peer::new(host_tx))
            .unwrap();
        room.open();

        // Exhaust the 30-message burst.
        for _ in 0..50 {
            route_client_frame(
                &state,
                &room,
                &room_id,
                "a",
                WireMessage::Message {
                    sender_id: None,
                    payload: "AA==".into(),
                },
            );
        }

        let mirrored = std::iter::from_fn(|| host_rx.try_recv().ok()).count();
        assert!(mirrored <= 31, "expected burst cap, saw {mirrored}");
        assert!(
            state
                .metrics
                .rate_limited_total
                .load(std::sync::atomic::Ordering::Relaxed)
                > 0
        );
    }

    #[tokio::test]
    async fn test_kick_delivers_and_removes() {
        let state = AppState::new(16, 8);
        let (host_tx, _host_rx) = mpsc::channel(8);
        let room_id = "r".repeat(43);
        let room = state
            .registry
            .create_room(&room_id, Peer::new(host_tx))
            .unwrap();
        room.open();

        let (a_tx, mut a_rx) = mpsc::channel(8);
        room.add_participant("a".into(), Peer::new(a_tx), 8).unwrap();

        assert!(route_host_frame(
            &state,
            &room,
            &room_id,
            WireMessage::Kick {
                client_id: "a".into()
            },
        ));
        assert_eq!(a_rx.try_recv().unwrap(), WireMessage::Kicked);
        assert_eq!(room.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_room_close_destroys() {
        let state = AppState::new(16, 8);
        let (host_tx, _host_rx) = mpsc::channel(8);
        let room_id = "r".repeat(43);
        let room = state
            .registry
            .create_room(&room_id, Peer::new(host_tx))
            .unwrap();

        // ROOM_CLOSE ends the connection and removes the room.
        assert!(!route_host_frame(
            &state,
            &room,
            &room_id,
            WireMessage::RoomClose,
        ));
        assert!(state.registry.is_empty());
    }
}
