//! Typed events emitted by a session to the application layer.
//!
//! The source's observer/delegate wiring is expressed as this enum on a
//! bounded channel: the application consumes events, never holds a
//! reference into the session.

use super::state::{DestroyReason, RoomState};
use crate::crypto::{ParticipantId, RoomId};
use crate::frame::Content;

/// A decrypted application message as handed to the application.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// Frame header sender id.
    pub sender_id: ParticipantId,
    /// Epoch the frame was sealed in.
    pub epoch: u32,
    /// Sender-local sequence.
    pub sequence: u64,
    /// Receipt wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Decoded payload.
    pub content: Content,
}

/// Counters the session keeps for dropped and rejected frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Frames rejected by the replay window.
    pub replays_rejected: u64,
    /// Frames that failed AEAD open or padding checks.
    pub decrypt_failures: u64,
    /// Frames dropped for epoch mismatch or undecodable content.
    pub frames_dropped: u64,
    /// Application messages sent.
    pub messages_sent: u64,
    /// Application messages delivered.
    pub messages_received: u64,
}

/// Session-to-application events.
#[derive(Debug)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged(RoomState),
    /// The relay acknowledged the room (host only).
    RoomCreated {
        /// The room now registered at the relay.
        room_id: RoomId,
    },
    /// A client asked to join; the host application decides (host only).
    JoinRequested {
        /// Relay client id to pass to `approve_join`/`reject_join`.
        relay_client_id: String,
        /// Display name from the request, already length-checked.
        display_name: Option<String>,
    },
    /// This endpoint completed its handshake (client only).
    Joined {
        /// Identity assigned by the host.
        participant_id: ParticipantId,
    },
    /// A participant was admitted (host: on confirmation; client: on
    /// authenticated roster notice).
    ParticipantJoined {
        /// The new participant.
        participant_id: ParticipantId,
        /// Display name, when known.
        display_name: Option<String>,
    },
    /// A participant left or was removed.
    ParticipantLeft {
        /// The departed participant.
        participant_id: ParticipantId,
    },
    /// An application message arrived.
    MessageReceived(DeliveredMessage),
    /// A rekey completed; the new epoch is live.
    EpochAdvanced {
        /// The epoch now in effect.
        epoch: u32,
    },
    /// The transport dropped and is retrying.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Terminal: the room is gone and keys are wiped.
    Destroyed {
        /// Why.
        reason: DestroyReason,
    },
}
