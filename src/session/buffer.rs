//! In-memory message buffer with auto-expiry.
//!
//! Delivered messages live here until their TTL lapses: 5 minutes under the
//! normal policy, 60 seconds under high security. A capture signal shrinks
//! the TTL to the high-security value for messages already buffered.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::event::DeliveredMessage;

/// Expiring FIFO of delivered messages.
#[derive(Debug)]
pub struct MessageBuffer {
    entries: VecDeque<(Instant, DeliveredMessage)>,
    ttl: Duration,
}

impl MessageBuffer {
    /// Create a buffer with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            ttl,
        }
    }

    /// Current TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Shrink the TTL (capture-signal acceleration). Never grows it.
    pub fn accelerate(&mut self, ttl: Duration) {
        if ttl < self.ttl {
            self.ttl = ttl;
        }
    }

    /// Buffer a delivered message.
    pub fn push(&mut self, message: DeliveredMessage) {
        self.entries.push_back((Instant::now(), message));
    }

    /// Drop entries older than the TTL; returns how many expired.
    pub fn expire(&mut self) -> usize {
        let cutoff = Instant::now();
        let before = self.entries.len();
        while let Some((stored_at, _)) = self.entries.front() {
            if cutoff.duration_since(*stored_at) >= self.ttl {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        before - self.entries.len()
    }

    /// Drop everything immediately.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of live messages, oldest first.
    pub fn snapshot(&self) -> Vec<DeliveredMessage> {
        self.entries.iter().map(|(_, m)| m.clone()).collect()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ParticipantId;
    use crate::frame::Content;

    fn message(sequence: u64) -> DeliveredMessage {
        DeliveredMessage {
            sender_id: ParticipantId::from_bytes([0xA0; 16]),
            epoch: 1,
            sequence,
            timestamp_ms: 0,
            content: Content::Text(format!("msg {sequence}")),
        }
    }

    #[test]
    fn test_push_snapshot_order() {
        let mut buffer = MessageBuffer::new(Duration::from_secs(300));
        buffer.push(message(1));
        buffer.push(message(2));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].sequence, 1);
        assert_eq!(snapshot[1].sequence, 2);
    }

    #[test]
    fn test_zero_ttl_expires_everything() {
        let mut buffer = MessageBuffer::new(Duration::ZERO);
        buffer.push(message(1));
        buffer.push(message(2));
        assert_eq!(buffer.expire(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_live_entries_survive_expire() {
        let mut buffer = MessageBuffer::new(Duration::from_secs(300));
        buffer.push(message(1));
        assert_eq!(buffer.expire(), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_accelerate_only_shrinks() {
        let mut buffer = MessageBuffer::new(Duration::from_secs(300));
        buffer.accelerate(Duration::from_secs(60));
        assert_eq!(buffer.ttl(), Duration::from_secs(60));
        buffer.accelerate(Duration::from_secs(300));
        assert_eq!(buffer.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_clear_on_destroy() {
        let mut buffer = MessageBuffer::new(Duration::from_secs(300));
        buffer.push(message(1));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
