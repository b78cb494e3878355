//! Error types for the Ephemeral Rooms protocol.
//!
//! Each layer owns a typed error enum; everything folds into [`RoomsError`]
//! at the crate boundary. Crypto and parsing failures are values, never
//! panics - no unwinding crosses a security boundary.

use thiserror::Error;

/// Errors raised while validating untrusted input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Room id is not 43 URL-safe base64 characters (or fails to decode).
    #[error("invalid room id")]
    InvalidRoomId,

    /// Invite token is malformed.
    #[error("invalid invite token")]
    InvalidToken,

    /// X25519 public key failed to parse.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Padded plaintext length prefix is inconsistent with the buffer.
    #[error("invalid padding")]
    InvalidPadding,

    /// Decrypted content failed its type-specific decoding.
    #[error("invalid content encoding")]
    InvalidContent,

    /// Frame is shorter than the minimum wire size.
    #[error("frame too short: {actual} bytes, need {expected}")]
    FrameTooShort {
        /// Minimum acceptable size.
        expected: usize,
        /// Observed size.
        actual: usize,
    },

    /// Frame carries an unknown protocol version.
    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Content exceeds the largest padding bucket (or the wire frame cap).
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// X25519 agreement produced an all-zero shared secret (low-order peer
    /// key) or otherwise failed.
    #[error("key agreement failed")]
    KeyAgreementFailed,

    /// AEAD open failed (invalid tag or corrupted ciphertext).
    #[error("decryption failed")]
    DecryptionFailed,

    /// A MAC or transcript check failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The OS CSPRNG failed; unrecoverable.
    #[error("random generation failed")]
    RandomFailed,
}

/// Protocol-level violations detected after cryptographic checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Join request timestamp outside the +/-60 s skew window.
    #[error("timestamp out of range")]
    TimestampOutOfRange,

    /// Join approval failed validation on the client.
    #[error("invalid join approval")]
    InvalidApproval,

    /// Sequence already seen or below the replay window.
    #[error("replay detected")]
    ReplayDetected,

    /// Frame or confirmation carries the wrong epoch.
    #[error("epoch mismatch: expected {expected}, got {actual}")]
    EpochMismatch {
        /// Epoch this endpoint is tracking.
        expected: u32,
        /// Epoch observed on the wire.
        actual: u32,
    },

    /// A rekey offer addressed to a different participant's key.
    #[error("participant mismatch")]
    ParticipantMismatch,
}

/// Capacity limits on the relay.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Server-wide room limit reached.
    #[error("server at capacity")]
    ServerAtCapacity,

    /// Per-room participant limit reached.
    #[error("room full")]
    RoomFull,

    /// Invite token cap (per room or server-wide) reached.
    #[error("invite token limit reached")]
    TokenLimit,
}

/// Session and registry state violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Clients may not join before the host has opened the room.
    #[error("room not open")]
    RoomNotOpen,

    /// The room id resolves to nothing.
    #[error("room not found")]
    RoomNotFound,

    /// The operation requires the Active state.
    #[error("session not active")]
    NotActive,

    /// A conflicting operation is already in flight.
    #[error("already processing")]
    AlreadyProcessing,
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Initial connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The transport is not ready to carry traffic.
    #[error("transport not ready")]
    NotReady,

    /// A deadline elapsed.
    #[error("timed out")]
    Timeout,

    /// The connection is gone and reconnection was exhausted.
    #[error("disconnected")]
    Disconnected,

    /// I/O error from the socket layer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level protocol error.
#[derive(Debug, Error)]
pub enum RoomsError {
    /// Input validation error.
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Capacity error.
    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),

    /// State error.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The short, non-leaking strings shown to end users.
///
/// Everything internal maps onto one of these four; no error detail beyond
/// this enum ever reaches the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacingError {
    /// The invite token expired or was already used.
    InviteExpired,
    /// The room was destroyed.
    RoomEnded,
    /// The transport gave up.
    ConnectionLost,
    /// The invite token never existed.
    InvalidInvite,
}

impl UserFacingError {
    /// The display string for this condition.
    pub fn message(self) -> &'static str {
        match self {
            Self::InviteExpired => "invite expired",
            Self::RoomEnded => "room ended",
            Self::ConnectionLost => "connection lost",
            Self::InvalidInvite => "invalid invite",
        }
    }
}
