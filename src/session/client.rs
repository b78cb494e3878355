//! Client-side session task.
//!
//! A client connects to the room's join endpoint, runs the handshake, and
//! then sends and receives encrypted frames. Rekey offers arrive as
//! ordinary encrypted frames; the client unwraps the next master, holds it
//! pending, confirms, and promotes it when the first frame of the new epoch
//! arrives.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::buffer::MessageBuffer;
use super::event::{DeliveredMessage, SessionCounters, SessionEvent};
use super::state::{DestroyReason, MembershipNotice, RoomState};
use super::{jitter_up_to, now_ms, DelayedSends, SessionConfig};
use crate::core::{
    CaptureSignal, RoomsError, StateError, JOIN_TIMEOUT, MESSAGE_BUFFER_TTL_HIGH_SECURITY,
};
use crate::crypto::{schedule, EphemeralKeypair, ParticipantId, RoomId, SecretBuffer};
use crate::frame::{open_frame, parse_frame, seal_frame, Content, FrameView};
use crate::handshake::{self, JoinApproval, JoinRejection};
use crate::rekey::{self, RekeyEnvelope};
use crate::replay::SenderTracker;
use crate::transport::{FramePriority, Transport, TransportEvent, WireMessage};

/// Commands accepted by the client task.
enum Command {
    SendMessage {
        content: Content,
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

/// Handle to a running client session.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Encrypt and send an application message.
    pub async fn send_message(&self, content: Content) -> Result<(), RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SendMessage { content, reply })
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive)?
    }

    /// Leave the room gracefully.
    pub async fn close_room(&self, reason: DestroyReason) -> Result<(), RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::CloseRoom { reason, reply })
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive)?
    }

    /// Synchronous destroy: wipe keys and drop the connection. Never
    /// blocks.
    pub fn quick_exit(&self) {
        let _ = self.commands.try_send(Command::QuickExit);
    }

    /// Feed a device capture signal into the session.
    pub fn capture_signal(&self, signal: CaptureSignal) {
        let _ = self.commands.try_send(Command::Capture(signal));
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> Result<RoomState, RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::QueryState(reply))
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive.into())
    }

    /// Snapshot of the live message buffer.
    pub async fn messages(&self) -> Result<Vec<DeliveredMessage>, RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::QueryMessages(reply))
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive.into())
    }

    /// Drop/rejection counters.
    pub async fn counters(&self) -> Result<SessionCounters, RoomsError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::QueryCounters(reply))
            .await
            .map_err(|_| StateError::NotActive)?;
        response.await.map_err(|_| StateError::NotActive.into())
    }
}

/// Spawn a client session joining `room_id` over an already-connected
/// transport (the join URL, with any invite token, is the transport's
/// concern).
pub fn spawn_client(
    config: SessionConfig,
    transport: Box<dyn Transport>,
    transport_events: mpsc::Receiver<TransportEvent>,
    room_id: RoomId,
    display_name: Option<String>,
) -> (ClientHandle, mpsc::Receiver<SessionEvent>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(config.event_queue_depth);

    let task = ClientTask {
        buffer: MessageBuffer::new(config.buffer_ttl()),
        config,
        room_id,
        display_name,
        state: RoomState::Creating,
        keypair: EphemeralKeypair::generate(),
        pending_keypair: None,
        master: None,
        pending_master: None,
        epoch: 0,
        send_sequence: 0,
        participant_id: None,
        join_deadline: Instant::now() + JOIN_TIMEOUT,
        join_sent: false,
        replay: SenderTracker::new(),
        counters: SessionCounters::default(),
        transport,
        events: event_tx,
        delayed: DelayedSends::new(),
    };
    tokio::spawn(task.run(command_rx, transport_events));

    (ClientHandle { commands: command_tx }, event_rx)
}

struct ClientTask {
    config: SessionConfig,
    room_id: RoomId,
    display_name: Option<String>,
    state: RoomState,
    /// Current ephemeral keypair; replaced by `pending_keypair` when a
    /// rekey promotes.
    keypair: EphemeralKeypair,
    pending_keypair: Option<EphemeralKeypair>,
    master: Option<SecretBuffer>,
    /// Unwrapped next master, held until the new epoch's first frame.
    pending_master: Option<(u32, SecretBuffer)>,
    epoch: u32,
    send_sequence: u64,
    participant_id: Option<ParticipantId>,
    join_deadline: Instant,
    join_sent: bool,
    replay: SenderTracker,
    buffer: MessageBuffer,
    counters: SessionCounters,
    transport: Box<dyn Transport>,
    events: mpsc::Sender<SessionEvent>,
    delayed: DelayedSends,
}

impl ClientTask {
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

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { content, reply } => {
                let _ = reply.send(self.send_content(&content));
            }
            Command::CloseRoom { reason, reply } => {
                self.destroy(reason).await;
                let _ = reply.send(Ok(()));
            }
            Command::QuickExit => self.destroy(DestroyReason::HostClosed).await,
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

    async fn handle_capture(&mut self, signal: CaptureSignal) {
        match signal {
            CaptureSignal::ScreenshotTaken | CaptureSignal::CaptureStarted => {
                // Only the host can rotate the epoch; the client shortens
                // its own exposure window.
                self.buffer.accelerate(MESSAGE_BUFFER_TTL_HIGH_SECURITY);
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
            WireMessage::Connected { client_id: _ } => {
                if self.join_sent {
                    return;
                }
                match handshake::build_join_request(
                    &self.keypair,
                    self.display_name.as_deref(),
                    now_ms(),
                ) {
                    Ok(request) => {
                        let payload = serde_json::to_string(&request)
                            .expect("request serialization is infallible");
                        if self
                            .transport
                            .send(
                                WireMessage::JoinRequest {
                                    client_id: None,
                                    payload,
                                },
                                FramePriority::Control,
                            )
                            .is_err()
                        {
                            self.destroy(DestroyReason::ConnectionLost).await;
                            return;
                        }
                        self.join_sent = true;
                    }
                    Err(e) => {
                        warn!("join request build failed: {e}");
                        self.destroy(DestroyReason::HandshakeFailed).await;
                    }
                }
            }
            WireMessage::JoinResponse {
                approve, payload, ..
            } => self.handle_join_response(approve, &payload).await,
            WireMessage::Message { payload, .. } => self.handle_frame_payload(&payload).await,
            WireMessage::Kicked => self.destroy(DestroyReason::Kicked).await,
            WireMessage::RoomDestroyed { reason } => {
                self.destroy(DestroyReason::parse(&reason)).await;
            }
            WireMessage::Error { code, message } => {
                warn!("relay error {code}: {message}");
                let reason = if self.state == RoomState::Creating {
                    DestroyReason::HandshakeFailed
                } else {
                    DestroyReason::ServerEvicted
                };
                self.destroy(reason).await;
            }
            other => {
                self.counters.frames_dropped += 1;
                debug!("client ignoring unexpected frame: {other:?}");
            }
        }
    }

    async fn handle_join_response(&mut self, approve: bool, payload: &str) {
        if self.state != RoomState::Creating {
            debug!("join response outside handshake, dropping");
            return;
        }
        if !approve {
            let reason = serde_json::from_str::<JoinRejection>(payload)
                .map(|r| r.reason)
                .unwrap_or_default();
            debug!("join rejected: {reason}");
            self.destroy(DestroyReason::HandshakeFailed).await;
            return;
        }

        let approval: JoinApproval = match serde_json::from_str(payload) {
            Ok(approval) => approval,
            Err(_) => {
                self.destroy(DestroyReason::HandshakeFailed).await;
                return;
            }
        };
        match handshake::process_approval(&self.keypair, &self.room_id, &approval) {
            Ok(joined) => {
                let payload = serde_json::to_string(&joined.confirmation)
                    .expect("confirmation serialization is infallible");
                if self
                    .transport
                    .send(
                        WireMessage::JoinConfirm {
                            client_id: None,
                            payload,
                        },
                        FramePriority::Control,
                    )
                    .is_err()
                {
                    self.destroy(DestroyReason::ConnectionLost).await;
                    return;
                }
                self.master = Some(joined.master);
                self.epoch = joined.epoch;
                self.participant_id = Some(joined.participant_id);
                self.set_state(RoomState::Active).await;
                self.emit(SessionEvent::Joined {
                    participant_id: joined.participant_id,
                })
                .await;
            }
            Err(e) => {
                warn!("join approval failed: {e}");
                self.destroy(DestroyReason::HandshakeFailed).await;
            }
        }
    }

    // ── Inbound frames ───────────────────────────────────────────────────

    async fn handle_frame_payload(&mut self, payload: &str) {
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

        if self.master.is_none() {
            self.counters.frames_dropped += 1;
            return;
        }

        // A frame from the next epoch proves the transition completed;
        // promote the pending master before opening it.
        if self
            .pending_master
            .as_ref()
            .is_some_and(|(epoch, _)| *epoch == view.epoch)
        {
            self.promote_pending().await;
        }
        if view.epoch != self.epoch {
            self.counters.frames_dropped += 1;
            debug!("dropping frame for epoch {} (at {})", view.epoch, self.epoch);
            return;
        }

        if !self.replay.validate_and_mark(&view.sender_id, view.sequence) {
            self.counters.replays_rejected += 1;
            return;
        }

        let master = self.master.as_ref().expect("checked above");
        let content = match open_frame(master, &view) {
            Ok(content) => content,
            Err(_) => {
                self.counters.decrypt_failures += 1;
                return;
            }
        };

        match content {
            Content::Rekey(envelope_bytes) => {
                self.handle_rekey_content(&envelope_bytes).await;
            }
            Content::System(text) => self.handle_system_notice(&view, text).await,
            content => self.deliver(&view, content).await,
        }
    }

    async fn deliver(&mut self, view: &FrameView<'_>, content: Content) {
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

    /// Roster notices are system frames carrying an authenticated JSON
    /// body. Anything that does not parse as a notice is delivered as a
    /// plain system message.
    async fn handle_system_notice(&mut self, view: &FrameView<'_>, text: String) {
        let Ok(notice) = serde_json::from_str::<MembershipNotice>(&text) else {
            self.deliver(view, Content::System(text)).await;
            return;
        };
        if !self.verify_notice(&notice, view.epoch) {
            self.counters.frames_dropped += 1;
            warn!("membership notice failed authentication, dropping");
            return;
        }
        match notice.event.as_str() {
            "joined" => {
                self.emit(SessionEvent::ParticipantJoined {
                    participant_id: notice.participant_id,
                    display_name: notice.display_name.clone(),
                })
                .await;
            }
            "left" | "kicked" => {
                self.replay.remove(&notice.participant_id);
                self.emit(SessionEvent::ParticipantLeft {
                    participant_id: notice.participant_id,
                })
                .await;
            }
            other => debug!("unknown roster event {other}, ignoring"),
        }
        self.deliver(view, Content::System(text)).await;
    }

    fn verify_notice(&self, notice: &MembershipNotice, epoch: u32) -> bool {
        let Some(master) = self.master.as_ref() else {
            return false;
        };
        let Ok(mut key) = schedule::membership_key(master, epoch, &self.room_id) else {
            return false;
        };
        let mut mac_input =
            Vec::with_capacity(notice.event.len() + 16 + 4);
        mac_input.extend_from_slice(notice.event.as_bytes());
        mac_input.extend_from_slice(notice.participant_id.as_bytes());
        mac_input.extend_from_slice(&epoch.to_be_bytes());
        let verdict = STANDARD
            .decode(&notice.mac)
            .ok()
            .map(|mac| schedule::verify_hmac(&key, &mac_input, &mac).is_ok())
            .unwrap_or(false);
        key.wipe();
        verdict
    }

    // ── Rekey ────────────────────────────────────────────────────────────

    async fn handle_rekey_content(&mut self, bytes: &[u8]) {
        let envelope = match RekeyEnvelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.counters.frames_dropped += 1;
                return;
            }
        };
        let offer = match envelope {
            RekeyEnvelope::Offer(offer) => offer,
            RekeyEnvelope::Confirm(_) => {
                // Confirmations flow client-to-host only.
                self.counters.frames_dropped += 1;
                return;
            }
        };
        let Some(master) = self.master.as_ref() else {
            self.counters.frames_dropped += 1;
            return;
        };

        let outcome =
            match rekey::respond_to_offer(&self.keypair, master, &self.room_id, self.epoch, &offer)
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("rekey offer rejected: {e}");
                    self.counters.frames_dropped += 1;
                    return;
                }
            };

        // Confirm under the current epoch; the host is still listening
        // there until every participant has answered.
        let confirmation_content = Content::Rekey(outcome.confirmation.encode());
        if let Err(e) = self.send_content_now(&confirmation_content, FramePriority::RekeyBearing) {
            warn!("rekey confirmation send failed: {e}");
            self.destroy(DestroyReason::ConnectionLost).await;
            return;
        }

        self.pending_master = Some((outcome.new_epoch, outcome.pending_master));
        self.pending_keypair = Some(outcome.next_keypair);
        self.set_state(RoomState::Rekeying).await;
    }

    async fn promote_pending(&mut self) {
        let Some((new_epoch, new_master)) = self.pending_master.take() else {
            return;
        };
        if let Some(mut old) = self.master.replace(new_master) {
            old.wipe();
        }
        if let Some(next_keypair) = self.pending_keypair.take() {
            self.keypair = next_keypair;
        }
        self.epoch = new_epoch;
        self.send_sequence = 0;
        self.replay.reset();
        self.set_state(RoomState::Active).await;
        self.emit(SessionEvent::EpochAdvanced { epoch: new_epoch }).await;
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    fn send_content(&mut self, content: &Content) -> Result<(), RoomsError> {
        if !self.state.can_send() {
            return Err(StateError::NotActive.into());
        }
        let frame = self.seal(content)?;
        let jitter = jitter_up_to(self.config.send_jitter_max)?;
        self.delayed.push(
            jitter,
            WireMessage::Message {
                sender_id: None,
                payload: STANDARD.encode(frame),
            },
            FramePriority::Droppable,
        );
        self.counters.messages_sent += 1;
        Ok(())
    }

    /// Seal and transmit immediately (rekey confirmations skip the jitter
    /// queue so the host's confirmation window stays comfortable).
    fn send_content_now(
        &mut self,
        content: &Content,
        priority: FramePriority,
    ) -> Result<(), RoomsError> {
        let frame = self.seal(content)?;
        self.transport.send(
            WireMessage::Message {
                sender_id: None,
                payload: STANDARD.encode(frame),
            },
            priority,
        )?;
        Ok(())
    }

    fn seal(&mut self, content: &Content) -> Result<Vec<u8>, RoomsError> {
        let master = self.master.as_ref().ok_or(StateError::NotActive)?;
        let participant_id = self.participant_id.ok_or(StateError::NotActive)?;
        self.send_sequence += 1;
        Ok(seal_frame(
            master,
            self.epoch,
            self.send_sequence,
            &participant_id,
            content,
            self.config.high_security,
        )?)
    }

    // ── Timers ───────────────────────────────────────────────────────────

    async fn housekeeping(&mut self) {
        self.delayed.flush_due(self.transport.as_ref());
        self.buffer.expire();

        if self.state == RoomState::Creating && Instant::now() >= self.join_deadline {
            warn!("join timed out");
            self.destroy(DestroyReason::HandshakeFailed).await;
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    async fn set_state(&mut self, state: RoomState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state)).await;
        }
    }

    async fn destroy(&mut self, reason: DestroyReason) {
        if self.state.is_destroyed() {
            return;
        }
        if let Some(mut master) = self.master.take() {
            master.wipe();
        }
        if let Some((_, mut pending)) = self.pending_master.take() {
            pending.wipe();
        }
        self.pending_keypair = None;
        self.buffer.clear();
        self.delayed.clear();
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
