//! The key schedule.
//!
//! Every key in the protocol is an HKDF-SHA256 derivation with a 32-byte
//! output. Salts are always `SHA-256(structured context)` so they stay
//! fixed-width regardless of input sizes. Hashing the old master into the
//! rekey context prevents injection; forward secrecy comes from the fresh
//! DH, never from the labels.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::keys::RoomId;
use super::secret::{constant_time_eq, SecretBuffer};
use crate::core::{CryptoError, CONFIRM_NONCE_SIZE, HASH_SIZE, MASTER_KEY_SIZE, PUBLIC_KEY_SIZE};

/// Labels and salt constants, byte-for-byte fixed by the protocol.
mod labels {
    /// Prefix of the handshake confirmation HMAC input.
    pub const JOIN_CONFIRM: &[u8] = b"join-confirm-v1";
    pub const SESSION_KEY: &[u8] = b"session-key-v1";
    pub const PER_MESSAGE_KEY: &[u8] = b"per-message-key-v1";
    pub const PER_MESSAGE_SALT: &[u8] = b"EphemeralRooms-per-message-salt-v1";
    pub const REKEY_CONTEXT: &[u8] = b"ratchet-rekey-v2";
    pub const CONFIRM_KEY: &[u8] = b"rekey-confirm-key-v1";
    pub const CONFIRM_SALT: &[u8] = b"EphemeralRooms-confirm-salt-v1";
    pub const MEMBERSHIP_KEY: &[u8] = b"membership-key-v1";
    pub const MEMBERSHIP_SALT: &[u8] = b"EphemeralRooms-membership-salt-v1";
}

pub use labels::JOIN_CONFIRM;

/// One HKDF-SHA256 extract-and-expand with a 32-byte output.
fn hkdf32(ikm: &SecretBuffer, salt: &[u8], info: &[u8]) -> Result<SecretBuffer, CryptoError> {
    ikm.expose(|ikm_bytes| {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm_bytes);
        let mut okm = [0u8; MASTER_KEY_SIZE];
        hk.expand(info, &mut okm)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        let out = SecretBuffer::from_slice(&okm);
        okm.iter_mut().for_each(|b| *b = 0);
        Ok(out)
    })
}

/// Handshake session key.
///
/// `HKDF(ikm = DH(priv, peer_pub), salt = roomId,
///       info = host_pub || client_pub || roomId || "session-key-v1")`.
///
/// Both sides call this with the same `host_pub`/`client_pub` ordering, so
/// the derivation is symmetric.
pub fn session_key(
    dh_shared: &SecretBuffer,
    room_id: &RoomId,
    host_pub: &[u8; PUBLIC_KEY_SIZE],
    client_pub: &[u8; PUBLIC_KEY_SIZE],
) -> Result<SecretBuffer, CryptoError> {
    let mut info = Vec::with_capacity(PUBLIC_KEY_SIZE * 2 + HASH_SIZE + labels::SESSION_KEY.len());
    info.extend_from_slice(host_pub);
    info.extend_from_slice(client_pub);
    info.extend_from_slice(room_id.as_bytes());
    info.extend_from_slice(labels::SESSION_KEY);
    hkdf32(dh_shared, room_id.as_bytes(), &info)
}

/// Per-message key for `(epoch, sequence)` under the current master.
///
/// Derived for exactly one seal or open and scrubbed by the caller
/// immediately after. Fresh per-message keys make nonce collisions a
/// non-event even if an implementation drew a colliding nonce.
pub fn per_message_key(
    master: &SecretBuffer,
    epoch: u32,
    sequence: u64,
) -> Result<SecretBuffer, CryptoError> {
    let mut salt_input = Vec::with_capacity(4 + 8 + labels::PER_MESSAGE_SALT.len());
    salt_input.extend_from_slice(&epoch.to_be_bytes());
    salt_input.extend_from_slice(&sequence.to_be_bytes());
    salt_input.extend_from_slice(labels::PER_MESSAGE_SALT);
    let salt = Sha256::digest(&salt_input);
    hkdf32(master, &salt, labels::PER_MESSAGE_KEY)
}

/// The rekey context: `SHA-256(old_master) || roomId || new_epoch_be32 ||
/// "ratchet-rekey-v2"`.
///
/// The old master enters only through a one-way hash; holding the context
/// reveals nothing about it.
pub fn rekey_context(old_master: &SecretBuffer, room_id: &RoomId, new_epoch: u32) -> Vec<u8> {
    let master_hash = old_master.expose(|m| Sha256::digest(m));
    let mut context =
        Vec::with_capacity(HASH_SIZE * 2 + 4 + labels::REKEY_CONTEXT.len());
    context.extend_from_slice(&master_hash);
    context.extend_from_slice(room_id.as_bytes());
    context.extend_from_slice(&new_epoch.to_be_bytes());
    context.extend_from_slice(labels::REKEY_CONTEXT);
    context
}

/// Forward-secure rekey wrapping key.
///
/// `HKDF(ikm = DH(eph_priv, peer_pub), salt = SHA-256(context),
///       info = context)`.
pub fn rekey_wrapping_key(
    dh_shared: &SecretBuffer,
    context: &[u8],
) -> Result<SecretBuffer, CryptoError> {
    let salt = Sha256::digest(context);
    hkdf32(dh_shared, &salt, context)
}

/// Rekey confirmation key, derived from the new master and the offer's
/// confirmation nonce.
pub fn confirm_key(
    new_master: &SecretBuffer,
    new_epoch: u32,
    confirm_nonce: &[u8; CONFIRM_NONCE_SIZE],
) -> Result<SecretBuffer, CryptoError> {
    let mut salt_input =
        Vec::with_capacity(4 + CONFIRM_NONCE_SIZE + labels::CONFIRM_SALT.len());
    salt_input.extend_from_slice(&new_epoch.to_be_bytes());
    salt_input.extend_from_slice(confirm_nonce);
    salt_input.extend_from_slice(labels::CONFIRM_SALT);
    let salt = Sha256::digest(&salt_input);
    hkdf32(new_master, &salt, labels::CONFIRM_KEY)
}

/// Membership key for authenticating the host's roster notices.
pub fn membership_key(
    master: &SecretBuffer,
    epoch: u32,
    room_id: &RoomId,
) -> Result<SecretBuffer, CryptoError> {
    let mut salt_input =
        Vec::with_capacity(4 + HASH_SIZE + labels::MEMBERSHIP_SALT.len());
    salt_input.extend_from_slice(&epoch.to_be_bytes());
    salt_input.extend_from_slice(room_id.as_bytes());
    salt_input.extend_from_slice(labels::MEMBERSHIP_SALT);
    let salt = Sha256::digest(&salt_input);
    hkdf32(master, &salt, labels::MEMBERSHIP_KEY)
}

/// HMAC-SHA256 over `data` with a secret key.
pub fn hmac_sha256(key: &SecretBuffer, data: &[u8]) -> [u8; HASH_SIZE] {
    key.expose(|k| {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(k).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    })
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn verify_hmac(key: &SecretBuffer, data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    let expected = hmac_sha256(key, data);
    if constant_time_eq(&expected, tag) {
        Ok(())
    } else {
        Err(CryptoError::AuthenticationFailed)
    }
}
