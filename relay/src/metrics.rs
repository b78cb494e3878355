//! Relay counters exposed as `GET /metrics` in Prometheus text format.
//!
//! Only monotonic counters and the current room count - no participant
//! identifiers, room ids, or timing detail ever leave the process. All
//! counters are `AtomicU64` incremented inline; no metrics library needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// In-process counters shared across all connections.
#[derive(Debug)]
pub struct RelayMetrics {
    /// Rooms created since start.
    pub rooms_created: AtomicU64,
    /// Rooms destroyed since start.
    pub rooms_destroyed: AtomicU64,
    /// WebSocket connections accepted since start (hosts and clients).
    pub connections_total: AtomicU64,
    /// Frames relayed (broadcast fan-out counts once per recipient).
    pub messages_relayed: AtomicU64,
    /// Admissions and messages refused by a rate limiter.
    pub rate_limited_total: AtomicU64,
    /// Invite tokens issued since start.
    pub invites_issued: AtomicU64,
    /// Relay start time, for the uptime gauge.
    pub started_at: Instant,
}

impl RelayMetrics {
    /// Fresh counters.
    pub fn new() -> Self {
        Self {
            rooms_created: AtomicU64::new(0),
            rooms_destroyed: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
            invites_issued: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Increment one counter.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to one counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Render in Prometheus text format.
    ///
    /// The active room count requires the registry lock, so the caller
    /// passes it in.
    pub fn render_prometheus(&self, active_rooms: u64) -> String {
        let uptime = self.started_at.elapsed().as_secs();
        let rooms_created = self.rooms_created.load(Ordering::Relaxed);
        let rooms_destroyed = self.rooms_destroyed.load(Ordering::Relaxed);
        let connections_total = self.connections_total.load(Ordering::Relaxed);
        let messages_relayed = self.messages_relayed.load(Ordering::Relaxed);
        let rate_limited_total = self.rate_limited_total.load(Ordering::Relaxed);
        let invites_issued = self.invites_issued.load(Ordering::Relaxed);

        format!(
            "# HELP rooms_relay_uptime_seconds Relay uptime in seconds.\n\
             # TYPE rooms_relay_uptime_seconds gauge\n\
             rooms_relay_uptime_seconds {uptime}\n\
             # HELP rooms_relay_active_rooms Current number of live rooms.\n\
             # TYPE rooms_relay_active_rooms gauge\n\
             rooms_relay_active_rooms {active_rooms}\n\
             # HELP rooms_relay_rooms_created_total Rooms created since start.\n\
             # TYPE rooms_relay_rooms_created_total counter\n\
             rooms_relay_rooms_created_total {rooms_created}\n\
             # HELP rooms_relay_rooms_destroyed_total Rooms destroyed since start.\n\
             # TYPE rooms_relay_rooms_destroyed_total counter\n\
             rooms_relay_rooms_destroyed_total {rooms_destroyed}\n\
             # HELP rooms_relay_connections_total WebSocket connections accepted since start.\n\
             # TYPE rooms_relay_connections_total counter\n\
             rooms_relay_connections_total {connections_total}\n\
             # HELP rooms_relay_messages_relayed_total Frames relayed since start.\n\
             # TYPE rooms_relay_messages_relayed_total counter\n\
             rooms_relay_messages_relayed_total {messages_relayed}\n\
             # HELP rooms_relay_rate_limited_total Admissions and messages rate-limited since start.\n\
             # TYPE rooms_relay_rate_limited_total counter\n\
             rooms_relay_rate_limited_total {rate_limited_total}\n\
             # HELP rooms_relay_invites_issued_total Invite tokens issued since start.\n\
             # TYPE rooms_relay_invites_issued_total counter\n\
             rooms_relay_invites_issued_total {invites_issued}\n"
        )
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle.
pub type SharedMetrics = Arc<RelayMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_series() {
        let metrics = RelayMetrics::new();
        RelayMetrics::inc(&metrics.rooms_created);
        RelayMetrics::add(&metrics.messages_relayed, 3);

        let text = metrics.render_prometheus(1);
        assert!(text.contains("rooms_relay_active_rooms 1"));
        assert!(text.contains("rooms_relay_rooms_created_total 1"));
        assert!(text.contains("rooms_relay_messages_relayed_total 3"));
        assert!(text.contains("rooms_relay_rate_limited_total 0"));
        // No participant-identifying metadata in the output.
        assert!(!text.contains("client"));
        assert!(!text.contains("participant"));
    }
}
