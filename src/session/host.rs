//! Host-side session task.
//!
//! The host owns the room: it is the sole originator of master keys, admits
//! clients through the handshake, fans out encrypted frames, heartbeats the
//! relay, and drives every rekey.

use std::collections::HashMap;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::buffer::MessageBuffer;
use super::event::{DeliveredMessage, SessionCounters, SessionEvent};
use super::state::{
    DestroyReason, MembershipNotice, Participant, ParticipantTable, RoomState,
};
use super::{
    jitter_up_to, jittered_interval, now_ms, DelayedSends, SessionConfig,
};
use crate::core::{
    CapacityError, CaptureSignal, ProtocolError, RoomsError, StateError,
    DEFAULT_MAX_CLIENTS_PER_ROOM, MASTER_KEY_SIZE, MESSAGE_BUFFER_TTL_HIGH_SECURITY,
    PUBLIC_KEY_SIZE,
};
use crate::crypto::{schedule, EphemeralKeypair, ParticipantId, RoomId, SecretBuffer};
use crate::frame::{open_frame, parse_frame, seal_frame, Content};
use crate::handshake::{self, JoinConfirmation, JoinRejection, JoinRequest};
use crate::rekey::{HostRekey, RekeyEnvelope, RekeyTracker, RekeyTrigger};
use crate::replay::SenderTracker;
use crate::transport::{FramePriority, Transport, TransportEvent, WireMessage};

/// Commands accepted by the host task.
enum Command {
    ApproveJoin {
        relay_client_id: String,
        reply: oneshot::Sender<Result<(), RoomsError>>,
    },
    RejectJoin {
        relay_client_id: String,
        reason: String,
        reply: oneshot::Sender<Result<(), RoomsError>>,
    },
    Kick {
        participant_id: ParticipantId,
        reply: oneshot::Sender<Result<(), RoomsError>>,
    },
    SendMessage {
        content: Content,
        reply: oneshot::Sender<Result<(), RoomsError>>,
    },
    RekeyNow {
        reply: oneshot::Sender<Result<(), RoomsError>>,
    },
    CloseRoom {
        reason: DestroyReason,
        reply: oneshot::Sender<Result<(), RoomsError>>,
    },
    QuickExit,
    Capture(CaptureSignal),
    QueryState(oneshot::Sender<RoomState>),
    QueryMessages(oneshot::Sender<Vec<DeliveredMessage>>),
    QueryCounters(oneshot::Sender<SessionCounters>),
}

/// Handle to a running host session.
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<Command>,
}

impl HostHandle {
    /// Admit a pending join request.
    pub async fn approve_join(&self, relay_client_id: &str) -> Result<(), RoomsError> {
        self.call(|reply| Command::ApproveJoin {
            relay_client_id: relay_client_id.to_string(),
            reply,
        })
        .await
    }

    /// Reject a pending join request.
    pub async fn reject_join(&self, relay_client_id: &str, reason: &str) -> Result<(), RoomsError> {
        self.call(|reply| Command::RejectJoin {
            relay_client_id: relay_client_id.to_string(),
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    /// Evict a participant.
    pub async fn kick(&self, participant_id: ParticipantId) -> Result<(), RoomsError> {
        self.call(|reply| Command::Kick {
            participant_id,
            reply,
        })
        .await
    }

    /// Encrypt and broadcast an application message.
    pub async fn send_message(&self, content: Content) -> Result<(), RoomsError> {
        self.call(|reply| Command::SendMessage { content, reply }).await
    }

    /// Operator-requested rekey.
    pub async fn rekey_now(&self) -> Result<(), RoomsError> {
        self.call(|reply| Command::RekeyNow { reply }).await
    }

    /// Gracefully close the room, notifying the relay.
    pub async fn close_room(&self, reason: DestroyReason) -> Result<(), RoomsError> {
        self.call(|reply| Command::CloseRoom { reason, reply }).await
    }

    /// Synchronous destroy: wipe keys and drop the connection without a
    /// graceful close. Never blocks.
    pub fn quick_exit(&self) {
        let _ = self.commands.try_send(Command::QuickExit);
    }

    /// Feed a device capture signal into the session.
    pub fn capture_signal(&self, signal: CaptureSignal) {
        let _ = self.commands.try_send(Command::Capture(signal));
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> Result<RoomState, RoomsError> {
        self.query(Command::QueryState).await
    }

    /// Snapshot of the live message buffer.
    pub async fn messages(&self) -> Result<Vec<DeliveredMessage>, RoomsError> {
        self.query(Command::QueryMessages).await
    }

    /// Drop/rejection counters.
    pub async fn counters(&self) -> Result<SessionCounters, RoomsError> {
        self.query(Command::QueryCounters).await
    }

    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), RoomsError>>) -> Command,
    ) -> Result<(), RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive)?
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive.into())
    }
}

/// Spawn a host session for `room_id` over an already-connected transport.
///
/// The master key is generated here; the host is the sole originator of
/// master keys in the protocol.
pub fn spawn_host(
    config: SessionConfig,
    transport: Box<dyn Transport>,
    transport_events: mpsc::Receiver<TransportEvent>,
    room_id: RoomId,
) -> Result<(HostHandle, mpsc::Receiver<SessionEvent>), RoomsError> {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(config.event_queue_depth);

    let task = HostTask {
        buffer: MessageBuffer::new(config.buffer_ttl()),
        config,
        room_id,
        state: RoomState::Creating,
        keypair: EphemeralKeypair::generate(),
        master: SecretBuffer::random(MASTER_KEY_SIZE)?,
        epoch: 1,
        send_sequence: 0,
        participant_id: ParticipantId::generate(),
        participants: ParticipantTable::new(),
        pending_requests: HashMap::new(),
        awaiting_confirm: HashMap::new(),
        replay: SenderTracker::new(),
        rekey_tracker: RekeyTracker::new(),
        active_rekey: None,
        rekey_requested: false,
        counters: SessionCounters::default(),
        transport,
        events: event_tx,
        delayed: DelayedSends::new(),
        next_heartbeat: None,
    };
    tokio::spawn(task.run(command_rx, transport_events));

    Ok((HostHandle { commands: command_tx }, event_rx))
}

/// A join approved by the application, awaiting the client's confirmation.
struct AwaitingConfirm {
    participant_id: ParticipantId,
    client_pub: [u8; PUBLIC_KEY_SIZE],
    display_name: Option<String>,
    session_key: SecretBuffer,
}

struct HostTask {
    config: SessionConfig,
    room_id: RoomId,
    state: RoomState,
    keypair: EphemeralKeypair,
    master: SecretBuffer,
    epoch: u32,
    send_sequence: u64,
    participant_id: ParticipantId,
    participants: ParticipantTable,
    pending_requests: HashMap<String, JoinRequest>,
    awaiting_confirm: HashMap<String, AwaitingConfirm>,
    replay: SenderTracker,
    rekey_tracker: RekeyTracker,
    active_rekey: Option<HostRekey>,
    rekey_requested: bool,
    buffer: MessageBuffer,
    counters: SessionCounters,
    transport: Box<dyn Transport>,
    events: mpsc::Sender<SessionEvent>,
    delayed: DelayedSends,
    next_heartbeat: Option<Instant>,
}

impl HostTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: mpsc::Receiver<TransportEvent>,
    ) {
        let mut tick = tokio::time::interval(std::time::Duration::from_millis(100));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.destroy(DestroyReason::HostClosed).await,
                },
                event = transport_events.recv() => match event {
                    Some(event) => self.handle_transport(event).await,
                    None => self.destroy(DestroyReason::ConnectionLost).await,
                },
                _ = tick.tick() => self.housekeeping().await,
            }
            if self.state.is_destroyed() {
                break;
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ApproveJoin {
                relay_client_id,
                reply,
            } => {
                let _ = reply.send(self.approve_join(&relay_client_id));
            }
            Command::RejectJoin {
                relay_client_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.reject_join(&relay_client_id, &reason));
            }
            Command::Kick {
                participant_id,
                reply,
            } => {
                let result = self.kick(&participant_id).await;
                let _ = reply.send(result);
            }
            Command::SendMessage { content, reply } => {
                let _ = reply.send(self.send_content(&content));
            }
            Command::RekeyNow { reply } => {
                let _ = reply.send(self.start_rekey(RekeyTrigger::Operator));
            }
            Command::CloseRoom { reason, reply } => {
                let _ = self
                    .transport
                    .send(WireMessage::RoomClose, FramePriority::Control);
                self.destroy(reason).await;
                let _ = reply.send(Ok(()));
            }
            Command::QuickExit => {
                // No graceful close; wipe and drop the link.
                self.destroy(DestroyReason::HostClosed).await;
            }
            Command::Capture(signal) => self.handle_capture(signal).await,
            Command::QueryState(reply) => {
                let _ = reply.send(self.state);
            }
            Command::QueryMessages(reply) => {
                let _ = reply.send(self.buffer.snapshot());
            }
            Command::QueryCounters(reply) => {
                let _ = reply.send(self.counters);
            }
        }
    }

    fn approve_join(&mut self, relay_client_id: &str) -> Result<(), RoomsError> {
        if !matches!(self.state, RoomState::Open | RoomState::Active | RoomState::Rekeying) {
            return Err(StateError::RoomNotOpen.into());
        }
        if self.participants.len() >= DEFAULT_MAX_CLIENTS_PER_ROOM {
            return Err(CapacityError::RoomFull.into());
        }
        let request = self
            .pending_requests
            .remove(relay_client_id)
            .ok_or(ProtocolError::ParticipantMismatch)?;

        let approved = handshake::approve_join(
            &self.keypair,
            &self.room_id,
            &self.master,
            self.epoch,
            &request,
            now_ms(),
        )?;

        let payload = serde_json::to_string(&approved.approval)
            .expect("approval serialization is infallible");
        self.transport.send(
            WireMessage::JoinResponse {
                client_id: relay_client_id.to_string(),
                approve: true,
                payload,
            },
            FramePriority::Control,
        )?;

        self.awaiting_confirm.insert(
            relay_client_id.to_string(),
            AwaitingConfirm {
                participant_id: approved.participant_id,
                client_pub: approved.client_pub,
                display_name: approved.display_name,
                session_key: approved.session_key,
            },
        );
        Ok(())
    }

    fn reject_join(&mut self, relay_client_id: &str, reason: &str) -> Result<(), RoomsError> {
        self.pending_requests
            .remove(relay_client_id)
            .ok_or(ProtocolError::ParticipantMismatch)?;
        let payload = serde_json::to_string(&JoinRejection {
            reason: reason.to_string(),
        })
        .expect("rejection serialization is infallible");
        self.transport.send(
            WireMessage::JoinResponse {
                client_id: relay_client_id.to_string(),
                approve: false,
                payload,
            },
            FramePriority::Control,
        )?;
        Ok(())
    }

    async fn kick(&mut self, participant_id: &ParticipantId) -> Result<(), RoomsError> {
        let participant = self
            .participants
            .remove(participant_id)
            .ok_or(ProtocolError::ParticipantMismatch)?;
        self.replay.remove(participant_id);
        if let Some(rekey) = self.active_rekey.as_mut() {
            rekey.drop_participant(participant_id);
        }
        self.transport.send(
            WireMessage::Kick {
                client_id: participant.relay_client_id,
            },
            FramePriority::Control,
        )?;
        self.emit(SessionEvent::ParticipantLeft {
            participant_id: *participant_id,
        })
        .await;
        self.broadcast_notice("kicked", *participant_id, None);
        self.try_finish_rekey().await;
        Ok(())
    }

    async fn handle_capture(&mut self, signal: CaptureSignal) {
        match signal {
            CaptureSignal::ScreenshotTaken | CaptureSignal::CaptureStarted => {
                self.buffer.accelerate(MESSAGE_BUFFER_TTL_HIGH_SECURITY);
                if let Err(e) = self.start_rekey(RekeyTrigger::CaptureSignal) {
                    warn!("capture-triggered rekey failed: {e}");
                }
            }
            CaptureSignal::CaptureStopped => {}
            CaptureSignal::Backgrounded => self.destroy(DestroyReason::Backgrounded).await,
            CaptureSignal::Locked => self.destroy(DestroyReason::DeviceLocked).await,
        }
    }

    // ── Transport events ─────────────────────────────────────────────────

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected | TransportEvent::Bootstrapping(_) => {}
            TransportEvent::Reconnecting { attempt } => {
                self.emit(SessionEvent::Reconnecting { attempt }).await;
            }
            TransportEvent::Disconnected => self.destroy(DestroyReason::ConnectionLost).await,
            TransportEvent::Failed(reason) => {
                warn!("transport failed: {reason}");
                self.destroy(DestroyReason::ConnectionLost).await;
            }
            TransportEvent::Message(message) => self.handle_message(message).await,
        }
    }

    async fn handle_message(&mut self, message: WireMessage) {
        match message {
            WireMessage::RoomCreated { room_id } => {
                if room_id != self.room_id.to_text() {
                    warn!("relay acknowledged a different room, destroying");
                    self.destroy(DestroyReason::ServerEvicted).await;
                    return;
                }
                self.set_state(RoomState::Created).await;
                self.emit(SessionEvent::RoomCreated {
                    room_id: self.room_id,
                })
                .await;
                if self
                    .transport
                    .send(WireMessage::RoomOpen, FramePriority::Control)
                    .is_ok()
                {
                    self.set_state(RoomState::Open).await;
                    self.schedule_heartbeat();
                } else {
                    self.destroy(DestroyReason::ConnectionLost).await;
                }
            }
            WireMessage::JoinRequest {
                client_id: Some(relay_client_id),
                payload,
            } => match serde_json::from_str::<JoinRequest>(&payload) {
                Ok(request) => {
                    let display_name = request
                        .display_name
                        .as_deref()
                        .filter(|n| n.len() <= crate::core::MAX_DISPLAY_NAME_LEN)
                        .map(str::to_string);
                    self.pending_requests.insert(relay_client_id.clone(), request);
                    self.emit(SessionEvent::JoinRequested {
                        relay_client_id,
                        display_name,
                    })
                    .await;
                }
                Err(_) => {
                    self.counters.frames_dropped += 1;
                    debug!("dropping malformed join request");
                }
            },
            WireMessage::JoinConfirm {
                client_id: Some(relay_client_id),
                payload,
            } => self.handle_join_confirm(&relay_client_id, &payload).await,
            WireMessage::ClientMessage { client_id, payload } => {
                self.handle_client_frame(&client_id, &payload).await;
            }
            WireMessage::ClientLeft { client_id } => {
                self.awaiting_confirm.remove(&client_id);
                self.pending_requests.remove(&client_id);
                if let Some(participant) = self.participants.remove_by_relay_id(&client_id) {
                    self.replay.remove(&participant.id);
                    if let Some(rekey) = self.active_rekey.as_mut() {
                        rekey.drop_participant(&participant.id);
                    }
                    self.emit(SessionEvent::ParticipantLeft {
                        participant_id: participant.id,
                    })
                    .await;
                    self.broadcast_notice("left", participant.id, participant.display_name);
                    self.try_finish_rekey().await;
                }
            }
            WireMessage::HeartbeatAck => {}
            WireMessage::RoomDestroyed { reason } => {
                self.destroy(DestroyReason::parse(&reason)).await;
            }
            WireMessage::Error { code, message } => {
                warn!("relay error {code}: {message}");
                self.destroy(DestroyReason::ServerEvicted).await;
            }
            other => {
                self.counters.frames_dropped += 1;
                debug!("host ignoring unexpected frame: {other:?}");
            }
        }
    }

    async fn handle_join_confirm(&mut self, relay_client_id: &str, payload: &str) {
        let Some(awaiting) = self.awaiting_confirm.remove(relay_client_id) else {
            debug!("join confirm for unknown client, dropping");
            return;
        };
        let confirmation: JoinConfirmation = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(_) => {
                self.counters.frames_dropped += 1;
                return;
            }
        };
        let verdict = handshake::verify_confirmation(
            &awaiting.session_key,
            &awaiting.client_pub,
            &self.keypair.public_bytes(),
            &confirmation,
        );
        // The session key's single purpose is fulfilled either way.
        drop(awaiting.session_key);

        if verdict.is_err() {
            warn!("join confirmation failed verification, disconnecting client");
            let _ = self.transport.send(
                WireMessage::Kick {
                    client_id: relay_client_id.to_string(),
                },
                FramePriority::Control,
            );
            return;
        }

        let participant = Participant {
            id: awaiting.participant_id,
            relay_client_id: relay_client_id.to_string(),
            public_key: awaiting.client_pub,
            display_name: awaiting.display_name.clone(),
        };
        self.participants.insert(participant);

        if self.state == RoomState::Open {
            self.set_state(RoomState::Active).await;
        }
        self.emit(SessionEvent::ParticipantJoined {
            participant_id: awaiting.participant_id,
            display_name: awaiting.display_name.clone(),
        })
        .await;
        self.broadcast_notice("joined", awaiting.participant_id, awaiting.display_name);
    }

    async fn handle_client_frame(&mut self, _relay_client_id: &str, payload: &str) {
        let Ok(bytes) = STANDARD.decode(payload) else {
            self.counters.frames_dropped += 1;
            return;
        };
        let view = match parse_frame(&bytes) {
            Ok(view) => view,
            Err(_) => {
                self.counters.frames_dropped += 1;
                return;
            }
        };
        if view.epoch != self.epoch {
            self.counters.frames_dropped += 1;
            debug!("dropping frame with stale epoch {}", view.epoch);
            return;
        }
        if !self.replay.validate_and_mark(&view.sender_id, view.sequence) {
            self.counters.replays_rejected += 1;
            debug!("replay rejected from {}", view.sender_id);
            return;
        }
        let content = match open_frame(&self.master, &view) {
            Ok(content) => content,
            Err(_) => {
                self.counters.decrypt_failures += 1;
                return;
            }
        };

        match content {
            Content::Rekey(envelope_bytes) => {
                self.handle_rekey_content(&view.sender_id, &envelope_bytes).await;
            }
            content => {
                self.counters.messages_received += 1;
                let delivered = DeliveredMessage {
                    sender_id: view.sender_id,
                    epoch: view.epoch,
                    sequence: view.sequence,
                    timestamp_ms: now_ms(),
                    content,
                };
                self.buffer.push(delivered.clone());
                self.emit(SessionEvent::MessageReceived(delivered)).await;
            }
        }
    }

    async fn handle_rekey_content(&mut self, sender_id: &ParticipantId, bytes: &[u8]) {
        let envelope = match RekeyEnvelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.counters.frames_dropped += 1;
                return;
            }
        };
        let confirmation = match envelope {
            RekeyEnvelope::Confirm(c) => c,
            RekeyEnvelope::Offer(_) => {
                // Clients never originate offers.
                self.counters.frames_dropped += 1;
                return;
            }
        };
        let Some(rekey) = self.active_rekey.as_mut() else {
            // Superseded pending state: log and discard.
            debug!("late rekey confirmation from {sender_id}, discarding");
            return;
        };
        match rekey.handle_confirmation(sender_id, &self.room_id, &confirmation) {
            Ok(()) => self.try_finish_rekey().await,
            Err(e) => {
                warn!("rekey confirmation from {sender_id} rejected: {e}");
                self.counters.frames_dropped += 1;
            }
        }
    }

    // ── Rekey driving ────────────────────────────────────────────────────

    fn start_rekey(&mut self, trigger: RekeyTrigger) -> Result<(), RoomsError> {
        if !self.state.can_send() {
            return Err(StateError::NotActive.into());
        }
        if self.active_rekey.is_some() {
            // Serialized per room; concurrent triggers coalesce.
            self.rekey_requested = true;
            return Ok(());
        }
        if self.participants.is_empty() {
            self.rekey_tracker.reset();
            return Ok(());
        }

        debug!("starting rekey ({trigger:?}) from epoch {}", self.epoch);
        let (rekey, offers) = HostRekey::begin(
            &self.master,
            &self.room_id,
            self.epoch,
            &self.participants.public_keys(),
        )?;

        for (participant_id, envelope) in offers {
            let Some(participant) = self.participants.get(&participant_id) else {
                continue;
            };
            let relay_client_id = participant.relay_client_id.clone();
            let content = Content::Rekey(envelope.encode());
            self.send_sequence += 1;
            let frame = seal_frame(
                &self.master,
                self.epoch,
                self.send_sequence,
                &self.participant_id,
                &content,
                self.config.high_security,
            )?;
            self.transport.send(
                WireMessage::Direct {
                    client_id: relay_client_id,
                    payload: STANDARD.encode(frame),
                },
                FramePriority::RekeyBearing,
            )?;
        }

        self.active_rekey = Some(rekey);
        self.set_state_sync(RoomState::Rekeying);
        Ok(())
    }

    async fn try_finish_rekey(&mut self) {
        let all_confirmed = self
            .active_rekey
            .as_ref()
            .is_some_and(|rekey| rekey.all_confirmed());
        if !all_confirmed {
            return;
        }
        let rekey = self.active_rekey.take().expect("checked above");
        let (new_epoch, new_master, updated_keys) = rekey.finish();

        // The old master has served its last epoch.
        self.master.wipe();
        self.master = new_master;
        self.epoch = new_epoch;
        self.send_sequence = 0;
        self.replay.reset();
        self.rekey_tracker.reset();
        self.participants.update_public_keys(&updated_keys);

        self.set_state(RoomState::Active).await;
        self.emit(SessionEvent::EpochAdvanced { epoch: new_epoch }).await;

        if std::mem::take(&mut self.rekey_requested) {
            if let Err(e) = self.start_rekey(RekeyTrigger::Operator) {
                warn!("coalesced rekey failed to start: {e}");
            }
        }
    }

    async fn expire_rekey_laggards(&mut self) {
        let timeout = self.config.rekey_confirm_timeout;
        let laggards = match self.active_rekey.as_ref() {
            Some(rekey) => rekey.laggards(timeout),
            None => return,
        };
        for participant_id in laggards {
            warn!("participant {participant_id} missed the rekey window, dropping");
            if let Err(e) = self.kick(&participant_id).await {
                debug!("laggard kick failed: {e}");
            }
        }
        self.try_finish_rekey().await;
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    fn send_content(&mut self, content: &Content) -> Result<(), RoomsError> {
        if !self.state.can_send() {
            return Err(StateError::NotActive.into());
        }
        self.send_sequence += 1;
        let frame = seal_frame(
            &self.master,
            self.epoch,
            self.send_sequence,
            &self.participant_id,
            content,
            self.config.high_security,
        )?;
        let priority = match content {
            Content::Rekey(_) => FramePriority::RekeyBearing,
            _ => FramePriority::Droppable,
        };
        let jitter = jitter_up_to(self.config.send_jitter_max)?;
        self.delayed.push(
            jitter,
            WireMessage::Broadcast {
                payload: STANDARD.encode(frame),
            },
            priority,
        );
        self.counters.messages_sent += 1;
        self.rekey_tracker.record_message();
        Ok(())
    }

    /// Broadcast an authenticated roster notice. Failures are logged, not
    /// fatal: the roster event already reached the local application.
    fn broadcast_notice(
        &mut self,
        event: &str,
        participant_id: ParticipantId,
        display_name: Option<String>,
    ) {
        let notice = match self.build_notice(event, participant_id, display_name) {
            Ok(notice) => notice,
            Err(e) => {
                debug!("membership notice build failed: {e}");
                return;
            }
        };
        if let Err(e) = self.send_content(&notice) {
            debug!("membership notice send failed: {e}");
        }
    }

    fn build_notice(
        &self,
        event: &str,
        participant_id: ParticipantId,
        display_name: Option<String>,
    ) -> Result<Content, RoomsError> {
        let mut key = schedule::membership_key(&self.master, self.epoch, &self.room_id)?;
        let mut mac_input = Vec::with_capacity(event.len() + 16 + 4);
        mac_input.extend_from_slice(event.as_bytes());
        mac_input.extend_from_slice(participant_id.as_bytes());
        mac_input.extend_from_slice(&self.epoch.to_be_bytes());
        let mac = schedule::hmac_sha256(&key, &mac_input);
        key.wipe();

        let notice = MembershipNotice {
            event: event.to_string(),
            participant_id,
            display_name,
            mac: STANDARD.encode(mac),
        };
        Ok(Content::System(
            serde_json::to_string(&notice).expect("notice serialization is infallible"),
        ))
    }

    // ── Timers ───────────────────────────────────────────────────────────

    async fn housekeeping(&mut self) {
        self.delayed.flush_due(self.transport.as_ref());
        self.buffer.expire();

        if let Some(due) = self.next_heartbeat {
            if Instant::now() >= due {
                if self
                    .transport
                    .send(WireMessage::Heartbeat, FramePriority::Control)
                    .is_err()
                {
                    self.destroy(DestroyReason::ConnectionLost).await;
                    return;
                }
                self.schedule_heartbeat();
            }
        }

        if self.state == RoomState::Active
            && self
                .rekey_tracker
                .should_rekey(self.config.rekey_after_messages, self.config.rekey_after_time)
        {
            if let Err(e) = self.start_rekey(RekeyTrigger::Interval) {
                debug!("timer rekey not started: {e}");
            }
        }

        self.expire_rekey_laggards().await;
    }

    fn schedule_heartbeat(&mut self) {
        let interval = jittered_interval(
            self.config.heartbeat_interval,
            self.config.heartbeat_jitter(),
        )
        .unwrap_or(self.config.heartbeat_interval);
        self.next_heartbeat = Some(Instant::now() + interval);
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    async fn set_state(&mut self, state: RoomState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state)).await;
        }
    }

    fn set_state_sync(&mut self, state: RoomState) {
        if self.state != state {
            self.state = state;
            let _ = self.events.try_send(SessionEvent::StateChanged(state));
        }
    }

    async fn destroy(&mut self, reason: DestroyReason) {
        if self.state.is_destroyed() {
            return;
        }
        self.master.wipe();
        self.active_rekey = None;
        self.awaiting_confirm.clear();
        self.pending_requests.clear();
        self.buffer.clear();
        self.delayed.clear();
        self.next_heartbeat = None;
        self.transport.close();

        self.state = RoomState::Destroyed(reason);
        let _ = self
            .events
            .send(SessionEvent::StateChanged(self.state))
            .await;
        let _ = self.events.send(SessionEvent::Destroyed { reason }).await;
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}
