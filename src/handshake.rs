//! The authenticated join handshake.
//!
//! ```text
//! Client                                  Host
//!   | -- JoinRequest {client_pub, nonce,   |
//!   |    timestamp, display_name?} ------> |
//!   |                                      | skew check, ECDH, derive
//!   |                                      | session key, seal master
//!   | <- JoinApproval {participant_id,     |
//!   |    wrapped_master, nonce, epoch,     |
//!   |    host_pub} ----------------------- |
//!   | ECDH, open master,                   |
//!   | -- JoinConfirmation {proof} -------> |
//!   |                                      | verify HMAC, promote to
//!   |                                      | active membership
//! ```
//!
//! The session key exists only for the handshake; the wrapped master is the
//! only secret that crosses the wire, sealed with the 80-byte transcript
//! `host_pub || client_pub || roomId` as AAD.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::{
    CryptoError, InputError, ProtocolError, RoomsError, AEAD_NONCE_SIZE, HANDSHAKE_SKEW_WINDOW,
    JOIN_NONCE_SIZE, MAX_DISPLAY_NAME_LEN, PUBLIC_KEY_SIZE,
};
use crate::crypto::{
    aead, random_array, schedule, EphemeralKeypair, ParticipantId, RoomId, SecretBuffer,
};

/// First handshake message, client to host (forwarded blind by the relay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Client's ephemeral X25519 public key, base64.
    pub client_pub: String,
    /// 16 random bytes binding this request instance, base64.
    pub join_nonce: String,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Optional display name, at most 64 bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Second handshake message, host to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinApproval {
    /// Host-assigned participant id.
    pub participant_id: ParticipantId,
    /// Master key sealed under the session key (ciphertext || tag), base64.
    pub wrapped_master: String,
    /// AEAD nonce used for the wrap, base64.
    pub nonce: String,
    /// Epoch the wrapped master belongs to.
    pub epoch: u32,
    /// Host's ephemeral X25519 public key, base64.
    pub host_pub: String,
}

/// Rejection sent in place of an approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRejection {
    /// Host-chosen reason string (already user-safe).
    pub reason: String,
}

/// Final handshake message, client to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfirmation {
    /// `HMAC-SHA256(session_key, "join-confirm-v1" || client_pub || host_pub)`, base64.
    pub proof: String,
}

/// Host-side result of approving a join.
pub struct ApprovedJoin {
    /// The approval to send back through the relay.
    pub approval: JoinApproval,
    /// Participant id assigned to the client.
    pub participant_id: ParticipantId,
    /// The client's ephemeral public key (tracked for rekeys).
    pub client_pub: [u8; PUBLIC_KEY_SIZE],
    /// Display name carried in the request, if valid.
    pub display_name: Option<String>,
    /// Session key retained just long enough to verify the confirmation.
    pub session_key: SecretBuffer,
}

/// Client-side result of processing an approval.
pub struct ClientJoin {
    /// Participant id this endpoint now answers to.
    pub participant_id: ParticipantId,
    /// The unwrapped room master key.
    pub master: SecretBuffer,
    /// Epoch of the master.
    pub epoch: u32,
    /// Host's ephemeral public key (tracked for rekeys).
    pub host_pub: [u8; PUBLIC_KEY_SIZE],
    /// The confirmation to send back.
    pub confirmation: JoinConfirmation,
}

/// Build a join request for this client keypair.
pub fn build_join_request(
    client: &EphemeralKeypair,
    display_name: Option<&str>,
    now_ms: u64,
) -> Result<JoinRequest, RoomsError> {
    if let Some(name) = display_name {
        if name.len() > MAX_DISPLAY_NAME_LEN {
            return Err(InputError::MessageTooLarge(name.len()).into());
        }
    }
    let join_nonce: [u8; JOIN_NONCE_SIZE] = random_array().map_err(RoomsError::Crypto)?;
    Ok(JoinRequest {
        client_pub: STANDARD.encode(client.public_bytes()),
        join_nonce: STANDARD.encode(join_nonce),
        timestamp_ms: now_ms,
        display_name: display_name.map(str::to_string),
    })
}

/// Host processing of a join request.
///
/// Checks the timestamp skew, derives the session key, seals the current
/// master under it and assigns a participant id. The caller decides when to
/// actually transmit the approval (host admission is interactive).
pub fn approve_join(
    host: &EphemeralKeypair,
    room_id: &RoomId,
    master: &SecretBuffer,
    epoch: u32,
    request: &JoinRequest,
    now_ms: u64,
) -> Result<ApprovedJoin, RoomsError> {
    if now_ms.abs_diff(request.timestamp_ms) >= HANDSHAKE_SKEW_WINDOW.as_millis() as u64 {
        return Err(ProtocolError::TimestampOutOfRange.into());
    }

    let client_pub = decode_public_key(&request.client_pub)?;
    let host_pub = host.public_bytes();

    let dh = host.diffie_hellman(&client_pub)?;
    let session_key = schedule::session_key(&dh, room_id, &host_pub, &client_pub)?;
    drop(dh);

    let transcript = transcript(&host_pub, &client_pub, room_id);
    let nonce: [u8; AEAD_NONCE_SIZE] = random_array().map_err(RoomsError::Crypto)?;
    let wrapped =
        master.expose(|m| aead::seal(&session_key, &nonce, &transcript, m))?;

    let display_name = request
        .display_name
        .as_deref()
        .filter(|name| name.len() <= MAX_DISPLAY_NAME_LEN)
        .map(str::to_string);

    let participant_id = ParticipantId::generate();
    Ok(ApprovedJoin {
        approval: JoinApproval {
            participant_id,
            wrapped_master: STANDARD.encode(wrapped),
            nonce: STANDARD.encode(nonce),
            epoch,
            host_pub: STANDARD.encode(host_pub),
        },
        participant_id,
        client_pub,
        display_name,
        session_key,
    })
}

/// Client processing of an approval: unwrap the master and produce the
/// confirmation proof.
pub fn process_approval(
    client: &EphemeralKeypair,
    room_id: &RoomId,
    approval: &JoinApproval,
) -> Result<ClientJoin, RoomsError> {
    let host_pub = decode_public_key(&approval.host_pub)?;
    let client_pub = client.public_bytes();

    let wrapped = STANDARD
        .decode(&approval.wrapped_master)
        .map_err(|_| ProtocolError::InvalidApproval)?;
    let nonce: [u8; AEAD_NONCE_SIZE] = STANDARD
        .decode(&approval.nonce)
        .map_err(|_| ProtocolError::InvalidApproval)?
        .try_into()
        .map_err(|_| ProtocolError::InvalidApproval)?;

    let dh = client.diffie_hellman(&host_pub)?;
    let session_key = schedule::session_key(&dh, room_id, &host_pub, &client_pub)?;
    drop(dh);

    let transcript = transcript(&host_pub, &client_pub, room_id);
    let master_bytes = aead::open(&session_key, &nonce, &transcript, &wrapped)?;
    let master = SecretBuffer::new(master_bytes);

    let proof = confirmation_proof(&session_key, &client_pub, &host_pub);
    Ok(ClientJoin {
        participant_id: approval.participant_id,
        master,
        epoch: approval.epoch,
        host_pub,
        confirmation: JoinConfirmation {
            proof: STANDARD.encode(proof),
        },
    })
}

/// Host verification of the client's confirmation proof.
///
/// On success the participant is promoted to active membership; the session
/// key must be dropped by the caller afterwards.
pub fn verify_confirmation(
    session_key: &SecretBuffer,
    client_pub: &[u8; PUBLIC_KEY_SIZE],
    host_pub: &[u8; PUBLIC_KEY_SIZE],
    confirmation: &JoinConfirmation,
) -> Result<(), RoomsError> {
    let proof = STANDARD
        .decode(&confirmation.proof)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    let expected = confirmation_proof(session_key, client_pub, host_pub);
    if !crate::crypto::constant_time_eq(&expected, &proof) {
        return Err(CryptoError::AuthenticationFailed.into());
    }
    Ok(())
}

fn confirmation_proof(
    session_key: &SecretBuffer,
    client_pub: &[u8; PUBLIC_KEY_SIZE],
    host_pub: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; 32] {
    let mut data = Vec::with_capacity(schedule::JOIN_CONFIRM.len() + PUBLIC_KEY_SIZE * 2);
    data.extend_from_slice(schedule::JOIN_CONFIRM);
    data.extend_from_slice(client_pub);
    data.extend_from_slice(host_pub);
    schedule::hmac_sha256(session_key, &data)
}

fn transcript(
    host_pub: &[u8; PUBLIC_KEY_SIZE],
    client_pub: &[u8; PUBLIC_KEY_SIZE],
    room_id: &RoomId,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE * 2 + 32);
    out.extend_from_slice(host_pub);
    out.extend_from_slice(client_pub);
    out.extend_from_slice(room_id.as_bytes());
    out
}

fn decode_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_SIZE], InputError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| InputError::InvalidPublicKey)?;
    bytes
        .try_into()
        .map_err(|_| InputError::InvalidPublicKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW_MS: u64 = 1_700_000_000_000;

    fn fixtures() -> (EphemeralKeypair, EphemeralKeypair, RoomId, SecretBuffer) {
        (
            EphemeralKeypair::from_private_bytes([0x33; 32]),
            EphemeralKeypair::from_private_bytes([0x44; 32]),
            RoomId::from_bytes([0x11; 32]),
            SecretBuffer::from_slice(&[0x22; 32]),
        )
    }

    #[test]
    fn test_handshake_happy_path() {
        let (host, client, room_id, master) = fixtures();

        let request = build_join_request(&client, Some("alice"), NOW_MS).unwrap();
        let approved = approve_join(&host, &room_id, &master, 1, &request, NOW_MS + 500).unwrap();
        assert_eq!(approved.display_name.as_deref(), Some("alice"));

        let joined = process_approval(&client, &room_id, &approved.approval).unwrap();

        // The client recovers the master bit-for-bit.
        assert!(joined.master.ct_eq(&master));
        assert_eq!(joined.epoch, 1);
        assert_eq!(joined.participant_id, approved.participant_id);

        // And the host accepts the confirmation proof.
        verify_confirmation(
            &approved.session_key,
            &approved.client_pub,
            &host.public_bytes(),
            &joined.confirmation,
        )
        .unwrap();
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let (host, client, room_id, master) = fixtures();
        let request = build_join_request(&client, None, NOW_MS).unwrap();

        let result = approve_join(&host, &room_id, &master, 1, &request, NOW_MS + 60_000);
        assert!(matches!(
            result,
            Err(RoomsError::Protocol(ProtocolError::TimestampOutOfRange))
        ));

        // Skew in the other direction is equally stale.
        let result = approve_join(&host, &room_id, &master, 1, &request, NOW_MS - 60_000);
        assert!(result.is_err());

        // Just inside the window is fine.
        assert!(approve_join(&host, &room_id, &master, 1, &request, NOW_MS + 59_999).is_ok());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        let (host, client, room_id, master) = fixtures();
        let mut request = build_join_request(&client, None, NOW_MS).unwrap();
        request.client_pub = "not-base64!!!".into();

        assert!(matches!(
            approve_join(&host, &room_id, &master, 1, &request, NOW_MS),
            Err(RoomsError::Input(InputError::InvalidPublicKey))
        ));
    }

    #[test]
    fn test_oversize_display_name_rejected() {
        let (_, client, _, _) = fixtures();
        let name = "x".repeat(MAX_DISPLAY_NAME_LEN + 1);
        assert!(build_join_request(&client, Some(&name), NOW_MS).is_err());
    }

    #[test]
    fn test_wrong_room_fails_unwrap() {
        let (host, client, room_id, master) = fixtures();
        let request = build_join_request(&client, None, NOW_MS).unwrap();
        let approved = approve_join(&host, &room_id, &master, 1, &request, NOW_MS).unwrap();

        // The transcript binds the room id; a different room cannot open it.
        let other_room = RoomId::from_bytes([0x12; 32]);
        assert!(process_approval(&client, &other_room, &approved.approval).is_err());
    }

    #[test]
    fn test_wrong_client_cannot_unwrap() {
        let (host, client, room_id, master) = fixtures();
        let request = build_join_request(&client, None, NOW_MS).unwrap();
        let approved = approve_join(&host, &room_id, &master, 1, &request, NOW_MS).unwrap();

        let eavesdropper = EphemeralKeypair::from_private_bytes([0x55; 32]);
        assert!(process_approval(&eavesdropper, &room_id, &approved.approval).is_err());
    }

    #[test]
    fn test_forged_confirmation_rejected() {
        let (host, client, room_id, master) = fixtures();
        let request = build_join_request(&client, None, NOW_MS).unwrap();
        let approved = approve_join(&host, &room_id, &master, 1, &request, NOW_MS).unwrap();

        let forged = JoinConfirmation {
            proof: STANDARD.encode([0u8; 32]),
        };
        assert!(verify_confirmation(
            &approved.session_key,
            &approved.client_pub,
            &host.public_bytes(),
            &forged,
        )
        .is_err());
    }
}
