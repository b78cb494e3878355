//! Cryptographic primitives and the key schedule.
//!
//! - [`secret`]: scrubbable buffers, CSPRNG access, constant-time equality
//! - [`keys`]: X25519 keypairs and protocol identifiers
//! - [`aead`]: ChaCha20-Poly1305 seal/open
//! - [`schedule`]: HKDF-SHA256 derivations for every key in the protocol

pub mod aead;
pub mod keys;
pub mod schedule;
pub mod secret;

pub use keys::{parse_public_key, EphemeralKeypair, ParticipantId, RoomId};
pub use secret::{constant_time_eq, fill_random, random_array, SecretBuffer};
