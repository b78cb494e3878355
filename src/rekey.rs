//! Forward-secure rekeying.
//!
//! The host mints a fresh master and a fresh ephemeral keypair, rewraps the
//! master for every participant under a DH-derived wrapping key, and
//! advances the epoch once every tracked participant has confirmed (or been
//! dropped on timeout). Both the offer and the confirmation travel as
//! ordinary encrypted application frames (content type 0x05), so the relay
//! cannot distinguish a rekey from chat.
//!
//! Forward secrecy: an attacker holding the old master lacks the host's
//! ephemeral private key. The wrapping key requires it, and that key is
//! freshly generated, never transmitted, and scrubbed as soon as the
//! per-participant wraps are computed. The old master enters the derivation
//! only through a one-way hash in the salt/info context.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::core::{
    CryptoError, InputError, ProtocolError, RoomsError, AEAD_NONCE_SIZE, CONFIRM_NONCE_SIZE,
    MASTER_KEY_SIZE, PUBLIC_KEY_SIZE,
};
use crate::crypto::{
    aead, random_array, schedule, EphemeralKeypair, ParticipantId, RoomId, SecretBuffer,
};

/// Why a rekey started. Used for logging and trigger coalescing only; the
/// protocol messages are identical for every trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyTrigger {
    /// The per-epoch message counter crossed its threshold.
    MessageCount,
    /// The epoch outlived the wall-clock ceiling.
    Interval,
    /// A capture signal (screenshot or recording) fired.
    CaptureSignal,
    /// Explicit operator request.
    Operator,
}

/// Per-epoch trigger bookkeeping (host side).
#[derive(Debug)]
pub struct RekeyTracker {
    epoch_started: Instant,
    messages: u64,
}

impl RekeyTracker {
    /// Start tracking a fresh epoch.
    pub fn new() -> Self {
        Self {
            epoch_started: Instant::now(),
            messages: 0,
        }
    }

    /// Record one outbound application message. Rekey envelopes themselves
    /// do not count, or a room sitting at the threshold would rekey forever.
    pub fn record_message(&mut self) {
        self.messages += 1;
    }

    /// Whether either trigger has fired.
    pub fn should_rekey(&self, max_messages: u64, max_age: Duration) -> bool {
        self.messages >= max_messages || self.epoch_started.elapsed() >= max_age
    }

    /// Reset for the next epoch.
    pub fn reset(&mut self) {
        self.epoch_started = Instant::now();
        self.messages = 0;
    }
}

impl Default for RekeyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The payload carried inside a type-0x05 frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RekeyEnvelope {
    /// Host to one client: the rewrapped master.
    Offer(PerClientRekeyPayload),
    /// Client to host: confirmation of the new epoch.
    Confirm(RekeyConfirmation),
}

impl RekeyEnvelope {
    /// Serialize for embedding as frame content.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope serialization is infallible")
    }

    /// Parse from frame content bytes.
    ///
    /// # Errors
    /// `InvalidContent` on malformed JSON. A legacy broadcast rekey shape is
    /// not a valid envelope and fails here by construction.
    pub fn decode(bytes: &[u8]) -> Result<Self, InputError> {
        serde_json::from_slice(bytes).map_err(|_| InputError::InvalidContent)
    }
}

/// Host-to-client rekey offer for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerClientRekeyPayload {
    /// The epoch being transitioned to (current + 1).
    pub new_epoch: u32,
    /// New master sealed under the wrapping key (ciphertext || tag), base64.
    pub wrapped_key: String,
    /// AEAD nonce for the wrap, base64.
    pub nonce: String,
    /// Host's fresh ephemeral public key, base64.
    pub eph_pub: String,
    /// The recipient's current public key; recipients reject offers not
    /// addressed to their own key.
    pub client_pub: String,
    /// Nonce binding the confirmation to this offer, base64.
    pub confirm_nonce: String,
}

/// Client-to-host rekey confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RekeyConfirmation {
    /// The epoch being confirmed.
    pub epoch: u32,
    /// The client's next ephemeral public key, base64.
    pub new_client_pub: String,
    /// Echo of the offer's confirmation nonce, base64.
    pub confirm_nonce: String,
    /// `HMAC-SHA256(confirm_key, epoch || new_client_pub || confirm_nonce
    /// || host_eph_pub || roomId)`, base64.
    pub mac: String,
}

/// Wrap AAD: `new_epoch_be32 || roomId || eph_pub || client_pub`.
fn wrap_aad(
    new_epoch: u32,
    room_id: &RoomId,
    eph_pub: &[u8; PUBLIC_KEY_SIZE],
    client_pub: &[u8; PUBLIC_KEY_SIZE],
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(4 + 32 + PUBLIC_KEY_SIZE * 2);
    aad.extend_from_slice(&new_epoch.to_be_bytes());
    aad.extend_from_slice(room_id.as_bytes());
    aad.extend_from_slice(eph_pub);
    aad.extend_from_slice(client_pub);
    aad
}

/// Confirmation MAC input: `epoch_be32 || new_client_pub || confirm_nonce
/// || host_eph_pub || roomId`.
fn confirmation_mac_input(
    epoch: u32,
    new_client_pub: &[u8; PUBLIC_KEY_SIZE],
    confirm_nonce: &[u8; CONFIRM_NONCE_SIZE],
    host_eph_pub: &[u8; PUBLIC_KEY_SIZE],
    room_id: &RoomId,
) -> Vec<u8> {
    let mut data =
        Vec::with_capacity(4 + PUBLIC_KEY_SIZE * 2 + CONFIRM_NONCE_SIZE + 32);
    data.extend_from_slice(&epoch.to_be_bytes());
    data.extend_from_slice(new_client_pub);
    data.extend_from_slice(confirm_nonce);
    data.extend_from_slice(host_eph_pub);
    data.extend_from_slice(room_id.as_bytes());
    data
}

/// Per-participant state while a rekey is in flight.
#[derive(Debug)]
struct PendingParticipant {
    confirm_nonce: [u8; CONFIRM_NONCE_SIZE],
    confirmed: bool,
    new_client_pub: Option<[u8; PUBLIC_KEY_SIZE]>,
}

/// An in-flight host-side rekey. One per room; triggers arriving while this
/// exists coalesce instead of starting another.
pub struct HostRekey {
    new_epoch: u32,
    new_master: SecretBuffer,
    eph_pub: [u8; PUBLIC_KEY_SIZE],
    pending: HashMap<ParticipantId, PendingParticipant>,
    started_at: Instant,
}

impl HostRekey {
    /// Start a rekey: mint the new master and ephemeral pair, and wrap the
    /// master for every participant.
    ///
    /// Returns the in-flight state plus one offer envelope per participant.
    /// The ephemeral private key is scrubbed before this function returns -
    /// only its public half survives in the offers.
    pub fn begin(
        old_master: &SecretBuffer,
        room_id: &RoomId,
        current_epoch: u32,
        participants: &HashMap<ParticipantId, [u8; PUBLIC_KEY_SIZE]>,
    ) -> Result<(Self, Vec<(ParticipantId, RekeyEnvelope)>), RoomsError> {
        let new_epoch = current_epoch + 1;
        let new_master = SecretBuffer::random(MASTER_KEY_SIZE)?;
        let eph = EphemeralKeypair::generate();
        let eph_pub = eph.public_bytes();

        let context = schedule::rekey_context(old_master, room_id, new_epoch);

        let mut pending = HashMap::with_capacity(participants.len());
        let mut offers = Vec::with_capacity(participants.len());
        for (&participant_id, client_pub) in participants {
            let dh = eph.diffie_hellman(client_pub)?;
            let mut wrap_key = schedule::rekey_wrapping_key(&dh, &context)?;
            drop(dh);

            let nonce: [u8; AEAD_NONCE_SIZE] = random_array().map_err(RoomsError::Crypto)?;
            let confirm_nonce: [u8; CONFIRM_NONCE_SIZE] =
                random_array().map_err(RoomsError::Crypto)?;
            let aad = wrap_aad(new_epoch, room_id, &eph_pub, client_pub);
            let wrapped =
                new_master.expose(|m| aead::seal(&wrap_key, &nonce, &aad, m));
            wrap_key.wipe();
            let wrapped = wrapped?;

            pending.insert(
                participant_id,
                PendingParticipant {
                    confirm_nonce,
                    confirmed: false,
                    new_client_pub: None,
                },
            );
            offers.push((
                participant_id,
                RekeyEnvelope::Offer(PerClientRekeyPayload {
                    new_epoch,
                    wrapped_key: STANDARD.encode(wrapped),
                    nonce: STANDARD.encode(nonce),
                    eph_pub: STANDARD.encode(eph_pub),
                    client_pub: STANDARD.encode(client_pub),
                    confirm_nonce: STANDARD.encode(confirm_nonce),
                }),
            ));
        }
        // `eph` drops here; the private half is zeroized with it.

        Ok((
            Self {
                new_epoch,
                new_master,
                eph_pub,
                pending,
                started_at: Instant::now(),
            },
            offers,
        ))
    }

    /// The epoch this rekey is transitioning to.
    pub fn new_epoch(&self) -> u32 {
        self.new_epoch
    }

    /// Validate one participant's confirmation.
    ///
    /// # Errors
    /// `EpochMismatch` for the wrong epoch, `ParticipantMismatch` for an
    /// unknown or mismatched participant, `AuthenticationFailed` on a bad
    /// MAC or nonce echo.
    pub fn handle_confirmation(
        &mut self,
        participant_id: &ParticipantId,
        room_id: &RoomId,
        confirmation: &RekeyConfirmation,
    ) -> Result<(), RoomsError> {
        if confirmation.epoch != self.new_epoch {
            return Err(ProtocolError::EpochMismatch {
                expected: self.new_epoch,
                actual: confirmation.epoch,
            }
            .into());
        }

        let entry = self
            .pending
            .get_mut(participant_id)
            .ok_or(ProtocolError::ParticipantMismatch)?;

        let echoed_nonce: [u8; CONFIRM_NONCE_SIZE] = STANDARD
            .decode(&confirmation.confirm_nonce)
            .map_err(|_| CryptoError::AuthenticationFailed)?
            .try_into()
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        if !crate::crypto::constant_time_eq(&echoed_nonce, &entry.confirm_nonce) {
            return Err(CryptoError::AuthenticationFailed.into());
        }

        let new_client_pub: [u8; PUBLIC_KEY_SIZE] = STANDARD
            .decode(&confirmation.new_client_pub)
            .map_err(|_| InputError::InvalidPublicKey)?
            .try_into()
            .map_err(|_| InputError::InvalidPublicKey)?;

        let mut confirm_key =
            schedule::confirm_key(&self.new_master, self.new_epoch, &entry.confirm_nonce)?;
        let mac = STANDARD
            .decode(&confirmation.mac)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        let data = confirmation_mac_input(
            self.new_epoch,
            &new_client_pub,
            &entry.confirm_nonce,
            &self.eph_pub,
            room_id,
        );
        let verdict = schedule::verify_hmac(&confirm_key, &data, &mac);
        confirm_key.wipe();
        verdict?;

        entry.confirmed = true;
        entry.new_client_pub = Some(new_client_pub);
        Ok(())
    }

    /// Whether every tracked participant has confirmed.
    pub fn all_confirmed(&self) -> bool {
        self.pending.values().all(|p| p.confirmed)
    }

    /// Participants that have neither confirmed nor been dropped within
    /// `timeout` of the rekey start.
    pub fn laggards(&self, timeout: Duration) -> Vec<ParticipantId> {
        if self.started_at.elapsed() < timeout {
            return Vec::new();
        }
        self.pending
            .iter()
            .filter(|(_, p)| !p.confirmed)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Remove a participant from the pending set (timeout or leave).
    pub fn drop_participant(&mut self, participant_id: &ParticipantId) {
        self.pending.remove(participant_id);
    }

    /// Complete the transition, yielding the new epoch, the new master, and
    /// each confirmed participant's next public key. The caller scrubs the
    /// old master and resets sequence counters and replay windows.
    pub fn finish(self) -> (u32, SecretBuffer, HashMap<ParticipantId, [u8; PUBLIC_KEY_SIZE]>) {
        let updated = self
            .pending
            .into_iter()
            .filter_map(|(id, p)| p.new_client_pub.map(|pk| (id, pk)))
            .collect();
        (self.new_epoch, self.new_master, updated)
    }
}

/// Client-side result of accepting a rekey offer.
pub struct ClientRekeyOutcome {
    /// The epoch the offer transitions to.
    pub new_epoch: u32,
    /// The unwrapped next master; held pending until the first frame of the
    /// new epoch arrives, then promoted while the old master is scrubbed.
    pub pending_master: SecretBuffer,
    /// The keypair to use for the rekey after this one.
    pub next_keypair: EphemeralKeypair,
    /// The confirmation to send back as an encrypted frame.
    pub confirmation: RekeyEnvelope,
}

/// Client processing of a rekey offer.
///
/// Rejects offers addressed to a different participant's key, unwraps the
/// new master, rotates the client's ephemeral keypair, and produces the
/// authenticated confirmation.
pub fn respond_to_offer(
    client: &EphemeralKeypair,
    old_master: &SecretBuffer,
    room_id: &RoomId,
    current_epoch: u32,
    offer: &PerClientRekeyPayload,
) -> Result<ClientRekeyOutcome, RoomsError> {
    let addressed_to: [u8; PUBLIC_KEY_SIZE] = STANDARD
        .decode(&offer.client_pub)
        .map_err(|_| InputError::InvalidPublicKey)?
        .try_into()
        .map_err(|_| InputError::InvalidPublicKey)?;
    if addressed_to != client.public_bytes() {
        return Err(ProtocolError::ParticipantMismatch.into());
    }

    if offer.new_epoch != current_epoch + 1 {
        return Err(ProtocolError::EpochMismatch {
            expected: current_epoch + 1,
            actual: offer.new_epoch,
        }
        .into());
    }

    let host_eph_pub: [u8; PUBLIC_KEY_SIZE] = STANDARD
        .decode(&offer.eph_pub)
        .map_err(|_| InputError::InvalidPublicKey)?
        .try_into()
        .map_err(|_| InputError::InvalidPublicKey)?;
    let nonce: [u8; AEAD_NONCE_SIZE] = STANDARD
        .decode(&offer.nonce)
        .map_err(|_| CryptoError::DecryptionFailed)?
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let confirm_nonce: [u8; CONFIRM_NONCE_SIZE] = STANDARD
        .decode(&offer.confirm_nonce)
        .map_err(|_| CryptoError::DecryptionFailed)?
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let wrapped = STANDARD
        .decode(&offer.wrapped_key)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let context = schedule::rekey_context(old_master, room_id, offer.new_epoch);
    let dh = client.diffie_hellman(&host_eph_pub)?;
    let mut wrap_key = schedule::rekey_wrapping_key(&dh, &context)?;
    drop(dh);

    let aad = wrap_aad(offer.new_epoch, room_id, &host_eph_pub, &addressed_to);
    let unwrapped = aead::open(&wrap_key, &nonce, &aad, &wrapped);
    wrap_key.wipe();
    let pending_master = SecretBuffer::new(unwrapped?);

    let next_keypair = EphemeralKeypair::generate();
    let new_client_pub = next_keypair.public_bytes();

    let mut confirm_key =
        schedule::confirm_key(&pending_master, offer.new_epoch, &confirm_nonce)?;
    let data = confirmation_mac_input(
        offer.new_epoch,
        &new_client_pub,
        &confirm_nonce,
        &host_eph_pub,
        room_id,
    );
    let mac = schedule::hmac_sha256(&confirm_key, &data);
    confirm_key.wipe();

    Ok(ClientRekeyOutcome {
        new_epoch: offer.new_epoch,
        pending_master,
        next_keypair,
        confirmation: RekeyEnvelope::Confirm(RekeyConfirmation {
            epoch: offer.new_epoch,
            new_client_pub: STANDARD.encode(new_client_pub),
            confirm_nonce: STANDARD.encode(confirm_nonce),
            mac: STANDARD.encode(mac),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::from_bytes([0x11; 32])
    }

    fn old_master() -> SecretBuffer {
        SecretBuffer::from_slice(&[0x22; 32])
    }

    fn one_participant(
        client: &EphemeralKeypair,
    ) -> (ParticipantId, HashMap<ParticipantId, [u8; 32]>) {
        let id = ParticipantId::from_bytes([0xA0; 16]);
        let mut map = HashMap::new();
        map.insert(id, client.public_bytes());
        (id, map)
    }

    fn offer_for(
        offers: &[(ParticipantId, RekeyEnvelope)],
        id: &ParticipantId,
    ) -> PerClientRekeyPayload {
        let (_, envelope) = offers.iter().find(|(pid, _)| pid == id).unwrap();
        match envelope {
            RekeyEnvelope::Offer(offer) => offer.clone(),
            RekeyEnvelope::Confirm(_) => panic!("expected offer"),
        }
    }

    #[test]
    fn test_full_rekey_round() {
        let client = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let (id, participants) = one_participant(&client);

        let (mut rekey, offers) =
            HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();
        assert_eq!(rekey.new_epoch(), 2);
        assert!(!rekey.all_confirmed());

        let offer = offer_for(&offers, &id);
        let outcome = respond_to_offer(&client, &old_master(), &room(), 1, &offer).unwrap();
        assert_eq!(outcome.new_epoch, 2);

        let confirmation = match outcome.confirmation {
            RekeyEnvelope::Confirm(c) => c,
            RekeyEnvelope::Offer(_) => panic!("expected confirmation"),
        };
        rekey
            .handle_confirmation(&id, &room(), &confirmation)
            .unwrap();
        assert!(rekey.all_confirmed());

        let (epoch, new_master, updated) = rekey.finish();
        assert_eq!(epoch, 2);
        // Both sides hold the same next master.
        assert!(new_master.ct_eq(&outcome.pending_master));
        // The host recorded the client's rotated public key.
        assert_eq!(updated[&id], outcome.next_keypair.public_bytes());
    }

    #[test]
    fn test_old_master_alone_cannot_unwrap() {
        // An attacker captures the offer and holds the old master, but not
        // the host's ephemeral private key.
        let client = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let (id, participants) = one_participant(&client);
        let (_, offers) = HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();
        let offer = offer_for(&offers, &id);

        // The context is fully computable from the old master...
        let context = schedule::rekey_context(&old_master(), &room(), 2);
        // ...but without eph_priv the attacker can only guess the DH output.
        let guessed_dh = SecretBuffer::from_slice(&[0x99; 32]);
        let wrap_key = schedule::rekey_wrapping_key(&guessed_dh, &context).unwrap();

        let host_eph_pub: [u8; 32] = STANDARD
            .decode(&offer.eph_pub)
            .unwrap()
            .try_into()
            .unwrap();
        let nonce: [u8; 12] = STANDARD.decode(&offer.nonce).unwrap().try_into().unwrap();
        let wrapped = STANDARD.decode(&offer.wrapped_key).unwrap();
        let aad = wrap_aad(2, &room(), &host_eph_pub, &client.public_bytes());

        assert!(aead::open(&wrap_key, &nonce, &aad, &wrapped).is_err());
    }

    #[test]
    fn test_offer_for_other_participant_rejected() {
        let client = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let other = EphemeralKeypair::from_private_bytes([0x45; 32]);
        let (id, participants) = one_participant(&other);

        let (_, offers) = HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();
        let offer = offer_for(&offers, &id);

        // Cross-participant delivery: addressed to `other`, received by `client`.
        let result = respond_to_offer(&client, &old_master(), &room(), 1, &offer);
        assert!(matches!(
            result,
            Err(RoomsError::Protocol(ProtocolError::ParticipantMismatch))
        ));
    }

    #[test]
    fn test_epoch_mismatch_rejected() {
        let client = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let (id, participants) = one_participant(&client);
        let (_, offers) = HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();
        let offer = offer_for(&offers, &id);

        // Client already at epoch 2 sees an offer for epoch 2.
        let result = respond_to_offer(&client, &old_master(), &room(), 2, &offer);
        assert!(matches!(
            result,
            Err(RoomsError::Protocol(ProtocolError::EpochMismatch { .. }))
        ));
    }

    #[test]
    fn test_forged_confirmation_mac_rejected() {
        let client = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let (id, participants) = one_participant(&client);
        let (mut rekey, offers) =
            HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();
        let offer = offer_for(&offers, &id);

        let outcome = respond_to_offer(&client, &old_master(), &room(), 1, &offer).unwrap();
        let mut confirmation = match outcome.confirmation {
            RekeyEnvelope::Confirm(c) => c,
            RekeyEnvelope::Offer(_) => unreachable!(),
        };
        confirmation.mac = STANDARD.encode([0u8; 32]);

        assert!(rekey
            .handle_confirmation(&id, &room(), &confirmation)
            .is_err());
        assert!(!rekey.all_confirmed());
    }

    #[test]
    fn test_unknown_participant_confirmation_rejected() {
        let client = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let (id, participants) = one_participant(&client);
        let (mut rekey, offers) =
            HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();
        let offer = offer_for(&offers, &id);
        let outcome = respond_to_offer(&client, &old_master(), &room(), 1, &offer).unwrap();
        let confirmation = match outcome.confirmation {
            RekeyEnvelope::Confirm(c) => c,
            RekeyEnvelope::Offer(_) => unreachable!(),
        };

        let stranger = ParticipantId::from_bytes([0xB0; 16]);
        assert!(matches!(
            rekey.handle_confirmation(&stranger, &room(), &confirmation),
            Err(RoomsError::Protocol(ProtocolError::ParticipantMismatch))
        ));
    }

    #[test]
    fn test_laggard_dropped_and_epoch_advances() {
        let alice = EphemeralKeypair::from_private_bytes([0x44; 32]);
        let bob = EphemeralKeypair::from_private_bytes([0x46; 32]);
        let alice_id = ParticipantId::from_bytes([0xA0; 16]);
        let bob_id = ParticipantId::from_bytes([0xB0; 16]);
        let mut participants = HashMap::new();
        participants.insert(alice_id, alice.public_bytes());
        participants.insert(bob_id, bob.public_bytes());

        let (mut rekey, offers) =
            HostRekey::begin(&old_master(), &room(), 1, &participants).unwrap();

        // Only alice confirms.
        let offer = offer_for(&offers, &alice_id);
        let outcome = respond_to_offer(&alice, &old_master(), &room(), 1, &offer).unwrap();
        let confirmation = match outcome.confirmation {
            RekeyEnvelope::Confirm(c) => c,
            RekeyEnvelope::Offer(_) => unreachable!(),
        };
        rekey
            .handle_confirmation(&alice_id, &room(), &confirmation)
            .unwrap();

        // Bob times out; the epoch advances for the rest.
        assert!(!rekey.all_confirmed());
        assert_eq!(rekey.laggards(Duration::ZERO), vec![bob_id]);
        rekey.drop_participant(&bob_id);
        assert!(rekey.all_confirmed());

        let (epoch, _, updated) = rekey.finish();
        assert_eq!(epoch, 2);
        assert!(updated.contains_key(&alice_id));
        assert!(!updated.contains_key(&bob_id));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let confirmation = RekeyEnvelope::Confirm(RekeyConfirmation {
            epoch: 7,
            new_client_pub: STANDARD.encode([0x01; 32]),
            confirm_nonce: STANDARD.encode([0x02; 16]),
            mac: STANDARD.encode([0x03; 32]),
        });
        let decoded = RekeyEnvelope::decode(&confirmation.encode()).unwrap();
        assert!(matches!(decoded, RekeyEnvelope::Confirm(c) if c.epoch == 7));
    }

    #[test]
    fn test_legacy_broadcast_rekey_not_accepted() {
        // The retired broadcast rekey shape must not parse as an envelope.
        let legacy = br#"{"type":"rekey","epoch":2,"wrapped_key":"AAAA"}"#;
        assert!(RekeyEnvelope::decode(legacy).is_err());
    }

    #[test]
    fn test_tracker_triggers() {
        let mut tracker = RekeyTracker::new();
        assert!(!tracker.should_rekey(20, Duration::from_secs(60)));

        for _ in 0..20 {
            tracker.record_message();
        }
        assert!(tracker.should_rekey(20, Duration::from_secs(60)));

        tracker.reset();
        assert!(!tracker.should_rekey(20, Duration::from_secs(60)));
        // Wall-clock trigger with a zero ceiling fires immediately.
        assert!(tracker.should_rekey(20, Duration::ZERO));
    }
}
