//! X25519 key management and protocol identifiers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

use super::secret::SecretBuffer;
use crate::core::{CryptoError, InputError, PUBLIC_KEY_SIZE, ROOM_ID_SIZE, ROOM_ID_TEXT_LEN};

/// An ephemeral X25519 keypair.
///
/// The private half is zeroized on drop (x25519-dalek handles this). The
/// same private key may perform several agreements within its lifetime -
/// the host reuses one rekey ephemeral across all participant wraps - and
/// is discarded as soon as those wraps complete.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from raw private key material (tests and fixtures).
    pub fn from_private_bytes(private: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public half.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Perform X25519 with a peer public key.
    ///
    /// # Errors
    /// `KeyAgreementFailed` if the agreement is non-contributory (low-order
    /// peer key producing an all-zero shared secret).
    pub fn diffie_hellman(
        &self,
        peer_public: &[u8; PUBLIC_KEY_SIZE],
    ) -> Result<SecretBuffer, CryptoError> {
        let peer = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementFailed);
        }
        Ok(SecretBuffer::from_slice(shared.as_bytes()))
    }
}

/// Parse an X25519 public key from untrusted bytes.
///
/// # Errors
/// `InvalidPublicKey` on wrong length.
pub fn parse_public_key(bytes: &[u8]) -> Result<[u8; PUBLIC_KEY_SIZE], InputError> {
    bytes
        .try_into()
        .map_err(|_| InputError::InvalidPublicKey)
}

/// A 32-byte room identifier.
///
/// Either CSPRNG-random or the SHA-256 of a user-chosen short id. The
/// canonical text form is URL-safe base64 without padding, exactly 43
/// characters - the form that appears in relay URLs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId([u8; ROOM_ID_SIZE]);

impl RoomId {
    /// Generate a random room id.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(super::secret::random_array()?))
    }

    /// Derive a room id from a user-chosen short id.
    pub fn from_short_id(short_id: &str) -> Self {
        let digest = Sha256::digest(short_id.as_bytes());
        Self(digest.into())
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; ROOM_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse the canonical 43-character text form.
    ///
    /// # Errors
    /// `InvalidRoomId` on wrong length, alphabet, or decoded size.
    pub fn from_text(text: &str) -> Result<Self, InputError> {
        if text.len() != ROOM_ID_TEXT_LEN {
            return Err(InputError::InvalidRoomId);
        }
        let decoded = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|_| InputError::InvalidRoomId)?;
        let bytes: [u8; ROOM_ID_SIZE] =
            decoded.try_into().map_err(|_| InputError::InvalidRoomId)?;
        Ok(Self(bytes))
    }

    /// The canonical text form.
    pub fn to_text(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ROOM_ID_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Room ids are routing metadata, not secrets; an 8-char prefix is
        // enough to correlate log lines.
        write!(f, "RoomId({}..)", &self.to_text()[..8])
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

/// A 16-byte participant identifier (UUIDv4, host-assigned).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Generate a random participant id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap raw bytes (frame header form).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw 16-byte form used in frame headers.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParticipantId({})", self.0)
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
