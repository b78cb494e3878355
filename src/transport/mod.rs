//! Transport adapter: the wire codec plus the connection machinery.
//!
//! The session owns a boxed [`Transport`] and an inbox of
//! [`TransportEvent`]s; the adapter never calls back into the session. Both
//! the real WebSocket adapter and the in-memory mock conform to the same
//! two-operation surface: `send` plus the event stream handed out at
//! construction.

pub mod mock;
pub mod wire;
mod ws;

pub use mock::{MockRemote, MockTransport};
pub use wire::{decode, encode, WireMessage};
pub use ws::{is_hidden_service_url, WsConfig, WsTransport};

use crate::core::TransportError;

/// Drop class of an outbound frame under backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePriority {
    /// Lifecycle and handshake frames; overflow closes the connection.
    Control,
    /// Encrypted frames carrying a rekey envelope; never dropped.
    RekeyBearing,
    /// Ordinary chat traffic; oldest dropped first under backpressure.
    Droppable,
}

impl FramePriority {
    /// Whether the queue may shed this frame.
    pub fn droppable(self) -> bool {
        matches!(self, Self::Droppable)
    }
}

/// Events surfaced from the adapter to the session inbox.
#[derive(Debug)]
pub enum TransportEvent {
    /// Overlay bootstrap progress, 0-100.
    Bootstrapping(u8),
    /// The connection is up; queued frames are flushing.
    Connected,
    /// A parsed inbound wire frame.
    Message(WireMessage),
    /// Connection lost; reconnect attempt `attempt` is starting.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Reconnection was exhausted; the session must destroy itself.
    Disconnected,
    /// Unrecoverable transport failure.
    Failed(String),
}

/// The two-operation transport surface the session depends on.
pub trait Transport: Send + Sync {
    /// Enqueue a frame for transmission.
    ///
    /// Frames are transmitted in enqueue order within a connection
    /// lifetime. While disconnected, frames accumulate in the bounded queue
    /// and flush after reconnect.
    fn send(&self, message: WireMessage, priority: FramePriority) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    fn close(&self);
}
