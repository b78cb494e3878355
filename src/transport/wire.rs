//! The JSON wire protocol between endpoints and the relay.
//!
//! Every frame is a UTF-8 JSON object with a top-level `type` plus
//! type-specific fields. Opaque binary (encrypted message frames) rides in
//! `payload` as standard-alphabet base64; structured handshake payloads are
//! nested JSON encoded as strings. A single frame never exceeds 8 MiB in
//! either direction.

use serde::{Deserialize, Serialize};

use crate::core::{InputError, MAX_WIRE_FRAME_SIZE};

/// One wire frame.
///
/// The same enum covers all three directions (host to relay, client to
/// relay, relay to endpoint); each endpoint simply ignores types it never
/// receives. Forwarded `JOIN_REQUEST`/`JOIN_CONFIRM` frames carry the relay
/// client id stamped by the router; on the client-to-relay leg the field is
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WireMessage {
    // ── Host to relay ────────────────────────────────────────────────────
    /// Open the room for client admission.
    RoomOpen,
    /// Fan an opaque frame out to every participant.
    Broadcast {
        /// Base64 encrypted message frame.
        payload: String,
    },
    /// Deliver an opaque frame to one participant.
    Direct {
        /// Relay client id of the target.
        client_id: String,
        /// Base64 encrypted message frame.
        payload: String,
    },
    /// Approve or reject a pending join.
    JoinResponse {
        /// Relay client id of the joiner.
        client_id: String,
        /// Whether the join is approved.
        approve: bool,
        /// Nested JSON: `JoinApproval` on approve, `JoinRejection` on
        /// reject.
        payload: String,
    },
    /// Evict a participant.
    Kick {
        /// Relay client id of the target.
        client_id: String,
    },
    /// Destroy the room.
    RoomClose,
    /// Host liveness beacon.
    Heartbeat,

    // ── Client to relay (and forwarded to the host) ──────────────────────
    /// A join request (nested JSON `JoinRequest`).
    JoinRequest {
        /// Stamped by the relay when forwarding to the host.
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        /// Nested JSON `JoinRequest`.
        payload: String,
    },
    /// The handshake confirmation (nested JSON `JoinConfirmation`).
    JoinConfirm {
        /// Stamped by the relay when forwarding to the host.
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        /// Nested JSON `JoinConfirmation`.
        payload: String,
    },
    /// An opaque encrypted frame (client upload, or relay fan-out).
    Message {
        /// Stamped by the relay on fan-out; absent on upload.
        #[serde(skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
        /// Base64 encrypted message frame.
        payload: String,
    },

    // ── Relay to endpoint ────────────────────────────────────────────────
    /// The room record was created for this host connection.
    RoomCreated {
        /// Canonical room id.
        room_id: String,
    },
    /// The client connection was admitted to the room.
    Connected {
        /// Relay-assigned client id (CSPRNG, unlinked to identity).
        client_id: String,
    },
    /// A client message mirrored to the host.
    ClientMessage {
        /// Relay client id of the sender.
        client_id: String,
        /// Base64 encrypted message frame.
        payload: String,
    },
    /// A participant's connection closed.
    ClientLeft {
        /// Relay client id of the departed participant.
        client_id: String,
    },
    /// The room is gone.
    RoomDestroyed {
        /// Destroy reason (e.g. `host_closed`, `heartbeat_timeout`).
        reason: String,
    },
    /// This participant was evicted by the host.
    Kicked,
    /// Relay acknowledgement of a host heartbeat.
    HeartbeatAck,
    /// Relay-side error report.
    Error {
        /// Machine-readable error code.
        code: String,
        /// Human-readable detail (never key material).
        message: String,
    },
}

impl WireMessage {
    /// Whether this frame must never be dropped under backpressure.
    ///
    /// Control frames carry lifecycle or handshake state; losing one wedges
    /// the protocol, so queue overflow closes the connection instead.
    /// `Broadcast`/`Direct`/`Message` frames are droppable unless the
    /// caller marks them rekey-bearing at send time.
    pub fn is_control(&self) -> bool {
        !matches!(
            self,
            Self::Broadcast { .. } | Self::Direct { .. } | Self::Message { .. }
        )
    }
}

/// Serialize a frame, enforcing the 8 MiB cap.
pub fn encode(message: &WireMessage) -> Result<String, InputError> {
    let text = serde_json::to_string(message).map_err(|_| InputError::InvalidContent)?;
    if text.len() > MAX_WIRE_FRAME_SIZE {
        return Err(InputError::MessageTooLarge(text.len()));
    }
    Ok(text)
}

/// Parse a frame, enforcing the 8 MiB cap.
pub fn decode(text: &str) -> Result<WireMessage, InputError> {
    if text.len() > MAX_WIRE_FRAME_SIZE {
        return Err(InputError::MessageTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(|_| InputError::InvalidContent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let text = encode(&WireMessage::Message {
            sender_id: Some("abc123".into()),
            payload: "AAECAw==".into(),
        })
        .unwrap();
        assert!(text.contains(r#""type":"MESSAGE""#));
        assert!(text.contains(r#""senderId":"abc123""#));

        let text = encode(&WireMessage::RoomDestroyed {
            reason: "heartbeat_timeout".into(),
        })
        .unwrap();
        assert!(text.contains(r#""type":"ROOM_DESTROYED""#));
    }

    #[test]
    fn test_optional_ids_omitted() {
        let text = encode(&WireMessage::Message {
            sender_id: None,
            payload: "AA==".into(),
        })
        .unwrap();
        assert!(!text.contains("senderId"));

        let text = encode(&WireMessage::JoinRequest {
            client_id: None,
            payload: "{}".into(),
        })
        .unwrap();
        assert!(!text.contains("clientId"));
    }

    #[test]
    fn test_roundtrip_all_control_frames() {
        let frames = [
            WireMessage::RoomOpen,
            WireMessage::RoomClose,
            WireMessage::Heartbeat,
            WireMessage::HeartbeatAck,
            WireMessage::Kicked,
            WireMessage::Kick {
                client_id: "c1".into(),
            },
            WireMessage::RoomCreated {
                room_id: "r".repeat(43),
            },
            WireMessage::Connected {
                client_id: "c1".into(),
            },
            WireMessage::ClientLeft {
                client_id: "c1".into(),
            },
            WireMessage::Error {
                code: "ROOM_NOT_FOUND".into(),
                message: "room not found".into(),
            },
        ];
        for frame in frames {
            let decoded = decode(&encode(&frame).unwrap()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(decode(r#"{"type":"REKEY_BROADCAST","payload":"AA=="}"#).is_err());
        assert!(decode("not json at all").is_err());
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let message = WireMessage::Broadcast {
            payload: "A".repeat(MAX_WIRE_FRAME_SIZE),
        };
        assert!(matches!(
            encode(&message),
            Err(InputError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_control_classification() {
        assert!(WireMessage::RoomOpen.is_control());
        assert!(WireMessage::Heartbeat.is_control());
        assert!(WireMessage::JoinConfirm {
            client_id: None,
            payload: "{}".into()
        }
        .is_control());
        assert!(!WireMessage::Message {
            sender_id: None,
            payload: "AA==".into()
        }
        .is_control());
        assert!(!WireMessage::Broadcast {
            payload: "AA==".into()
        }
        .is_control());
    }
}
