//! Room lifecycle states and participant records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::PUBLIC_KEY_SIZE;
use crate::crypto::ParticipantId;

/// Endpoint view of the room lifecycle.
///
/// Hosts walk `Creating -> Created -> Open -> Active <-> Rekeying ->
/// Destroyed`; clients skip `Open` (they become `Active` on approval).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Connecting; nothing admitted yet.
    Creating,
    /// The relay acknowledged the room record (host only).
    Created,
    /// Admitting joins (host only).
    Open,
    /// Encrypted traffic is flowing.
    Active,
    /// An epoch transition is in flight.
    Rekeying,
    /// Terminal. All keying material has been wiped.
    Destroyed(DestroyReason),
}

impl RoomState {
    /// Whether messages may be sent in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Active | Self::Rekeying)
    }

    /// Whether this is the terminal state.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed(_))
    }
}

/// Why a room ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The host closed the room.
    HostClosed,
    /// The application moved to the background.
    Backgrounded,
    /// The device locked.
    DeviceLocked,
    /// The relay stopped hearing host heartbeats.
    HeartbeatTimeout,
    /// This participant was evicted.
    Kicked,
    /// The relay evicted the room (capacity or shutdown).
    ServerEvicted,
    /// The join handshake failed.
    HandshakeFailed,
    /// The transport gave up reconnecting.
    ConnectionLost,
}

impl DestroyReason {
    /// Wire string for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostClosed => "host_closed",
            Self::Backgrounded => "backgrounded",
            Self::DeviceLocked => "device_locked",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Kicked => "kicked",
            Self::ServerEvicted => "server_evicted",
            Self::HandshakeFailed => "handshake_failed",
            Self::ConnectionLost => "connection_lost",
        }
    }

    /// Parse a wire reason; unknown strings map to `ServerEvicted` so a
    /// newer relay cannot wedge an older endpoint.
    pub fn parse(reason: &str) -> Self {
        match reason {
            "host_closed" => Self::HostClosed,
            "backgrounded" => Self::Backgrounded,
            "device_locked" => Self::DeviceLocked,
            "heartbeat_timeout" => Self::HeartbeatTimeout,
            "kicked" => Self::Kicked,
            "handshake_failed" => Self::HandshakeFailed,
            "connection_lost" => Self::ConnectionLost,
            _ => Self::ServerEvicted,
        }
    }
}

impl std::fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One admitted participant, as tracked by the host.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Protocol identity (frame header sender id).
    pub id: ParticipantId,
    /// Relay routing handle; never linked to identity by the relay.
    pub relay_client_id: String,
    /// Current ephemeral public key, rotated on every rekey.
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Optional display name from the join request.
    pub display_name: Option<String>,
}

/// The host's participant table.
#[derive(Debug, Default)]
pub struct ParticipantTable {
    by_id: HashMap<ParticipantId, Participant>,
    relay_index: HashMap<String, ParticipantId>,
}

impl ParticipantTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of admitted participants.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the room has no participants.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Insert a participant on join confirmation.
    pub fn insert(&mut self, participant: Participant) {
        self.relay_index
            .insert(participant.relay_client_id.clone(), participant.id);
        self.by_id.insert(participant.id, participant);
    }

    /// Look up by protocol id.
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.by_id.get(id)
    }

    /// Look up by relay client id.
    pub fn get_by_relay_id(&self, relay_client_id: &str) -> Option<&Participant> {
        self.relay_index
            .get(relay_client_id)
            .and_then(|id| self.by_id.get(id))
    }

    /// Remove by protocol id.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        let participant = self.by_id.remove(id)?;
        self.relay_index.remove(&participant.relay_client_id);
        Some(participant)
    }

    /// Remove by relay client id (relay-reported departures).
    pub fn remove_by_relay_id(&mut self, relay_client_id: &str) -> Option<Participant> {
        let id = self.relay_index.remove(relay_client_id)?;
        self.by_id.remove(&id)
    }

    /// Current public keys keyed by participant id (rekey input).
    pub fn public_keys(&self) -> HashMap<ParticipantId, [u8; PUBLIC_KEY_SIZE]> {
        self.by_id
            .iter()
            .map(|(&id, p)| (id, p.public_key))
            .collect()
    }

    /// Replace each listed participant's public key (rekey completion).
    pub fn update_public_keys(&mut self, keys: &HashMap<ParticipantId, [u8; PUBLIC_KEY_SIZE]>) {
        for (id, key) in keys {
            if let Some(p) = self.by_id.get_mut(id) {
                p.public_key = *key;
            }
        }
    }

    /// Iterate over participants.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.by_id.values()
    }
}

/// Authenticated roster notice broadcast by the host inside a system
/// content frame. The MAC keys the notice to the membership key of the
/// epoch, so a participant cannot spoof roster changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipNotice {
    /// `joined`, `left`, or `kicked`.
    pub event: String,
    /// Affected participant.
    pub participant_id: ParticipantId,
    /// Display name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// `HMAC-SHA256(membership_key, event || participant_id || epoch_be32)`, base64.
    pub mac: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_reason_wire_roundtrip() {
        for reason in [
            DestroyReason::HostClosed,
            DestroyReason::Backgrounded,
            DestroyReason::DeviceLocked,
            DestroyReason::HeartbeatTimeout,
            DestroyReason::Kicked,
            DestroyReason::HandshakeFailed,
            DestroyReason::ConnectionLost,
        ] {
            assert_eq!(DestroyReason::parse(reason.as_str()), reason);
        }
        // Unknown reasons degrade safely.
        assert_eq!(
            DestroyReason::parse("quantum_entanglement"),
            DestroyReason::ServerEvicted
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(RoomState::Active.can_send());
        assert!(RoomState::Rekeying.can_send());
        assert!(!RoomState::Open.can_send());
        assert!(!RoomState::Destroyed(DestroyReason::HostClosed).can_send());
        assert!(RoomState::Destroyed(DestroyReason::Kicked).is_destroyed());
    }

    #[test]
    fn test_participant_table_indexes() {
        let mut table = ParticipantTable::new();
        let id = ParticipantId::from_bytes([0xA0; 16]);
        table.insert(Participant {
            id,
            relay_client_id: "relay-1".into(),
            public_key: [0x01; 32],
            display_name: Some("alice".into()),
        });

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&id).unwrap().relay_client_id, "relay-1");
        assert_eq!(table.get_by_relay_id("relay-1").unwrap().id, id);

        let removed = table.remove_by_relay_id("relay-1").unwrap();
        assert_eq!(removed.id, id);
        assert!(table.is_empty());
        assert!(table.get(&id).is_none());
    }

    #[test]
    fn test_public_key_rotation() {
        let mut table = ParticipantTable::new();
        let id = ParticipantId::from_bytes([0xA0; 16]);
        table.insert(Participant {
            id,
            relay_client_id: "relay-1".into(),
            public_key: [0x01; 32],
            display_name: None,
        });

        let mut rotated = HashMap::new();
        rotated.insert(id, [0x02; 32]);
        table.update_public_keys(&rotated);
        assert_eq!(table.get(&id).unwrap().public_key, [0x02; 32]);
    }
}
