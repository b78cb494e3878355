//! The session state machine.
//!
//! One tokio task owns all of a session's mutable state: lifecycle,
//! keying material, participant table, replay tracker, message buffer and
//! timers. Public operations arrive over a command channel, parsed
//! transport frames over the adapter's event inbox, and typed
//! [`SessionEvent`]s flow out to the application over a bounded channel.
//! Nothing else ever touches the keys.

mod buffer;
mod client;
mod event;
mod host;
mod state;

pub use buffer::MessageBuffer;
pub use client::{spawn_client, ClientHandle};
pub use event::{DeliveredMessage, SessionCounters, SessionEvent};
pub use host::{spawn_host, HostHandle};
pub use state::{DestroyReason, MembershipNotice, Participant, ParticipantTable, RoomState};

use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::core::{
    CryptoError, HEARTBEAT_INTERVAL, HEARTBEAT_JITTER_HIGH_SECURITY, HEARTBEAT_JITTER_NORMAL,
    MESSAGE_BUFFER_TTL, MESSAGE_BUFFER_TTL_HIGH_SECURITY, REKEY_AFTER_MESSAGES, REKEY_AFTER_TIME,
    REKEY_CONFIRM_TIMEOUT, SEND_JITTER_MAX,
};
use crate::crypto::{random_array, RoomId};
use crate::transport::{FramePriority, Transport, WireMessage};

/// Session tuning knobs. Defaults are the protocol values.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// High-security policy: coarser padding buckets, 60 s buffer TTL,
    /// wider heartbeat jitter.
    pub high_security: bool,
    /// Message-count rekey trigger.
    pub rekey_after_messages: u64,
    /// Wall-clock rekey trigger.
    pub rekey_after_time: Duration,
    /// Per-participant rekey confirmation timeout.
    pub rekey_confirm_timeout: Duration,
    /// Base host heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Maximum random delay before each outbound message.
    pub send_jitter_max: Duration,
    /// Depth of the application event channel.
    pub event_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            high_security: false,
            rekey_after_messages: REKEY_AFTER_MESSAGES,
            rekey_after_time: REKEY_AFTER_TIME,
            rekey_confirm_timeout: REKEY_CONFIRM_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            send_jitter_max: SEND_JITTER_MAX,
            event_queue_depth: 64,
        }
    }
}

impl SessionConfig {
    /// Buffer TTL under the configured policy.
    pub fn buffer_ttl(&self) -> Duration {
        if self.high_security {
            MESSAGE_BUFFER_TTL_HIGH_SECURITY
        } else {
            MESSAGE_BUFFER_TTL
        }
    }

    /// Heartbeat jitter fraction under the configured policy.
    pub fn heartbeat_jitter(&self) -> f64 {
        if self.high_security {
            HEARTBEAT_JITTER_HIGH_SECURITY
        } else {
            HEARTBEAT_JITTER_NORMAL
        }
    }
}

/// Derive a room id for `create_room`: the SHA-256 of a user-chosen short
/// id, or CSPRNG-random when none is given.
pub fn create_room_id(custom_id: Option<&str>) -> Result<RoomId, CryptoError> {
    match custom_id {
        Some(short_id) => Ok(RoomId::from_short_id(short_id)),
        None => RoomId::generate(),
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Uniform CSPRNG draw from `[0, max]`.
pub(crate) fn jitter_up_to(max: Duration) -> Result<Duration, CryptoError> {
    let raw: [u8; 8] = random_array()?;
    let millis = max.as_millis() as u64;
    if millis == 0 {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_millis(u64::from_be_bytes(raw) % (millis + 1)))
}

/// Heartbeat interval with a symmetric random jitter fraction.
pub(crate) fn jittered_interval(base: Duration, fraction: f64) -> Result<Duration, CryptoError> {
    let raw: [u8; 8] = random_array()?;
    // Uniform in [-1, 1].
    let unit = (u64::from_be_bytes(raw) as f64 / u64::MAX as f64) * 2.0 - 1.0;
    let scaled = base.as_secs_f64() * (1.0 + fraction * unit);
    Ok(Duration::from_secs_f64(scaled.max(0.05)))
}

/// Outbound frames waiting out their send jitter, in enqueue order.
#[derive(Default)]
pub(crate) struct DelayedSends {
    entries: VecDeque<(Instant, WireMessage, FramePriority)>,
}

impl DelayedSends {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, delay: Duration, message: WireMessage, priority: FramePriority) {
        self.entries
            .push_back((Instant::now() + delay, message, priority));
    }

    /// Transmit every frame whose deadline has passed. Enqueue order is
    /// preserved: a due frame behind a not-yet-due one waits, keeping the
    /// per-sender sequence order intact on the wire.
    pub(crate) fn flush_due(&mut self, transport: &dyn Transport) {
        let now = Instant::now();
        while let Some((deadline, _, _)) = self.entries.front() {
            if *deadline > now {
                break;
            }
            let (_, message, priority) = self.entries.pop_front().expect("front exists");
            if transport.send(message, priority).is_err() {
                break;
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_policy_values() {
        let normal = SessionConfig::default();
        assert_eq!(normal.buffer_ttl(), Duration::from_secs(300));
        assert!((normal.heartbeat_jitter() - 0.30).abs() < f64::EPSILON);

        let high = SessionConfig {
            high_security: true,
            ..SessionConfig::default()
        };
        assert_eq!(high.buffer_ttl(), Duration::from_secs(60));
        assert!((high.heartbeat_jitter() - 0.40).abs() < f64::EPSILON);
    }

    #[test]
    fn test_create_room_id_custom_is_hashed() {
        let custom = create_room_id(Some("movie-night")).unwrap();
        assert_eq!(custom, RoomId::from_short_id("movie-night"));

        let random_a = create_room_id(None).unwrap();
        let random_b = create_room_id(None).unwrap();
        assert_ne!(random_a, random_b);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..32 {
            let d = jitter_up_to(Duration::from_millis(300)).unwrap();
            assert!(d <= Duration::from_millis(300));
        }
        assert_eq!(jitter_up_to(Duration::ZERO).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_jittered_interval_bounds() {
        let base = Duration::from_secs(3);
        for _ in 0..32 {
            let d = jittered_interval(base, 0.30).unwrap();
            assert!(d >= Duration::from_secs_f64(3.0 * 0.69));
            assert!(d <= Duration::from_secs_f64(3.0 * 1.31));
        }
    }
}
