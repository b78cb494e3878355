//! Protocol constants for Ephemeral Rooms.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 nonce size (IETF, 96-bit).
pub const AEAD_NONCE_SIZE: usize = 12;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// SHA-256 hash output size.
pub const HASH_SIZE: usize = 32;

/// Master key size (per-epoch room secret).
pub const MASTER_KEY_SIZE: usize = 32;

/// Room identifier size.
pub const ROOM_ID_SIZE: usize = 32;

/// Participant identifier size (UUID).
pub const PARTICIPANT_ID_SIZE: usize = 16;

/// Join nonce size in the handshake request.
pub const JOIN_NONCE_SIZE: usize = 16;

/// Rekey confirmation nonce size.
pub const CONFIRM_NONCE_SIZE: usize = 16;

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 0x01;

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Frame header size: version(1) + epoch(4) + sequence(8) + sender_id(16) + nonce(12).
pub const FRAME_HEADER_SIZE: usize = 1 + 4 + 8 + PARTICIPANT_ID_SIZE + AEAD_NONCE_SIZE;

/// Minimum frame size (header + empty ciphertext + tag).
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + AEAD_TAG_SIZE;

/// AAD size: version(1) + epoch(4) + sequence(8) + sender_id(16).
pub const AAD_SIZE: usize = 1 + 4 + 8 + PARTICIPANT_ID_SIZE;

/// Length-prefix size inside the padded plaintext.
pub const PAD_LENGTH_PREFIX_SIZE: usize = 4;

// =============================================================================
// PADDING BUCKETS
// =============================================================================

/// Quantized padded-plaintext sizes, smallest first.
pub const PADDING_BUCKETS: [usize; 7] = [256, 1_024, 8_192, 65_536, 262_144, 1_048_576, 5_242_880];

/// Buckets permitted under the high-security policy.
pub const HIGH_SECURITY_BUCKETS: [usize; 3] = [1_024, 65_536, 5_242_880];

// =============================================================================
// CONTENT TYPES
// =============================================================================

/// Text message (UTF-8).
pub const CONTENT_TYPE_TEXT: u8 = 0x01;

/// Image payload (raw bytes, encoding opaque to the protocol).
pub const CONTENT_TYPE_IMAGE: u8 = 0x02;

/// System notice (UTF-8).
pub const CONTENT_TYPE_SYSTEM: u8 = 0x03;

/// Video payload (raw bytes, encoding opaque to the protocol).
pub const CONTENT_TYPE_VIDEO: u8 = 0x04;

/// Rekey envelope (offer or confirmation), indistinguishable from chat
/// traffic on the wire.
pub const CONTENT_TYPE_REKEY: u8 = 0x05;

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Maximum accepted clock skew on a join request timestamp.
pub const HANDSHAKE_SKEW_WINDOW: Duration = Duration::from_secs(60);

/// Session-level timeout for a join to complete end to end.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum display name length in bytes.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

// =============================================================================
// REKEY
// =============================================================================

/// Initiate a rekey after this many application messages in an epoch.
pub const REKEY_AFTER_MESSAGES: u64 = 20;

/// Initiate a rekey after this long in an epoch.
pub const REKEY_AFTER_TIME: Duration = Duration::from_secs(60);

/// Drop a participant that has not confirmed a rekey within this window.
pub const REKEY_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// REPLAY WINDOW
// =============================================================================

/// Per-sender sliding window size in bits.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

// =============================================================================
// SESSION TIMERS
// =============================================================================

/// Base host heartbeat interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Heartbeat jitter fraction under the normal policy.
pub const HEARTBEAT_JITTER_NORMAL: f64 = 0.30;

/// Heartbeat jitter fraction under the high-security policy.
pub const HEARTBEAT_JITTER_HIGH_SECURITY: f64 = 0.40;

/// Delivered messages expire from the in-memory buffer after this long.
pub const MESSAGE_BUFFER_TTL: Duration = Duration::from_secs(300);

/// Buffer expiry under the high-security policy.
pub const MESSAGE_BUFFER_TTL_HIGH_SECURITY: Duration = Duration::from_secs(60);

/// Maximum random delay added before each outbound message.
pub const SEND_JITTER_MAX: Duration = Duration::from_millis(300);

// =============================================================================
// TRANSPORT
// =============================================================================

/// Maximum size of a single wire frame (either direction).
pub const MAX_WIRE_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Outbound queue depth per connection.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Initial reconnect backoff.
pub const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Reconnect backoff ceiling.
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Reconnect attempts before the transport gives up and surfaces
/// `Disconnected`.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 6;

// =============================================================================
// RELAY DEFAULTS
// =============================================================================

/// Server-wide room capacity.
pub const DEFAULT_MAX_ROOMS: usize = 10_000;

/// Participants per room.
pub const DEFAULT_MAX_CLIENTS_PER_ROOM: usize = 50;

/// Host heartbeat timeout; the room is destroyed when exceeded.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(6);

/// Heartbeat monitor check interval.
pub const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(3);

/// Invite token lifetime.
pub const INVITE_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Invite token raw size (before base64url encoding to 32 chars).
pub const INVITE_TOKEN_SIZE: usize = 24;

/// Invite tokens per room.
pub const MAX_INVITES_PER_ROOM: usize = 100;

/// Invite tokens server-wide.
pub const MAX_INVITES_TOTAL: usize = 100_000;

/// Canonical text length of a room id (URL-safe base64, no padding).
pub const ROOM_ID_TEXT_LEN: usize = 43;

/// Canonical text length of an invite token.
pub const INVITE_TOKEN_TEXT_LEN: usize = 32;
