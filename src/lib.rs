//! # Ephemeral Rooms Protocol
//!
//! A host-anchored, relay-blind group messaging protocol. Messages exist
//! only in memory on participating devices; the relay routes opaque frames
//! and holds no plaintext, keys, or history. It provides:
//!
//! - **End-to-end encryption**: per-message keys under a per-epoch master,
//!   ChaCha20-Poly1305 with header-bound AAD
//! - **Forward secrecy**: periodic per-client DH rewrap of a fresh master
//! - **Traffic shaping**: padding buckets with random variance, jittered
//!   sends and heartbeats
//! - **Ephemerality**: the room dissolves when the host departs; every
//!   secret lives in a scrubbable buffer and is wiped on destroy
//!
//! ## Feature Flags
//!
//! - `crypto` (default): primitives, key schedule, frames, replay windows,
//!   handshake, rekey engine
//! - `transport` (default): wire protocol codec, WebSocket adapter, mock
//! - `session` (default): host and client session state machines
//!
//! ## Example
//!
//! ```ignore
//! use rooms_protocol::prelude::*;
//!
//! // Host side: create a room and spawn the session over a transport.
//! let room_id = create_room_id(None)?;
//! let url = format!("wss://{relay}/rooms/{}", room_id.to_text());
//! let (transport, inbox) = WsTransport::connect(WsConfig::new(url))?;
//! let (host, mut events) =
//!     spawn_host(SessionConfig::default(), Box::new(transport), inbox, room_id)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::JoinRequested { relay_client_id, .. } => {
//!             host.approve_join(&relay_client_id).await?;
//!         }
//!         SessionEvent::MessageReceived(message) => {
//!             // plaintext only ever exists here, in memory
//!         }
//!         SessionEvent::Destroyed { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod frame;

#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod replay;

#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod handshake;

#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod rekey;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Session state machine (feature-gated)
#[cfg(feature = "session")]
#[cfg_attr(docsrs, doc(cfg(feature = "session")))]
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{EphemeralKeypair, ParticipantId, RoomId, SecretBuffer};

    #[cfg(feature = "crypto")]
    pub use crate::frame::{Content, ContentType};

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        FramePriority, MockTransport, Transport, TransportEvent, WireMessage, WsConfig,
        WsTransport,
    };

    #[cfg(feature = "session")]
    pub use crate::session::{
        create_room_id, spawn_client, spawn_host, ClientHandle, DeliveredMessage, DestroyReason,
        HostHandle, RoomState, SessionConfig, SessionEvent,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{RoomsError, UserFacingError};

#[cfg(feature = "crypto")]
pub use crypto::{ParticipantId, RoomId, SecretBuffer};

#[cfg(feature = "session")]
pub use session::{SessionConfig, SessionEvent};
