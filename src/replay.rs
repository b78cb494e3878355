//! Per-sender anti-replay windows.
//!
//! Each sender gets a 64-bit sliding bitmap keyed off the highest sequence
//! seen. A candidate below `highest - 63`, or already marked, is a replay.
//! Check-and-mark happens in one call; the session task owns the tracker,
//! so the operation is atomic with respect to frame processing.

use std::collections::HashMap;

use crate::core::REPLAY_WINDOW_SIZE;
use crate::crypto::ParticipantId;

/// Sliding window replay detector for a single sender.
///
/// Bit `i` of the bitmap records `highest - i`; bit 0 is the highest
/// sequence itself. Sequence numbers start at 1 within each epoch, so a
/// fresh window (`highest == 0`) has seen nothing.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: u64,
    bitmap: u64,
}

impl ReplayWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest sequence accepted so far (0 if none).
    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Check a candidate sequence and mark it seen if valid.
    ///
    /// Returns `true` exactly once per acceptable sequence; `false` for
    /// anything below the window or already marked.
    pub fn validate_and_mark(&mut self, sequence: u64) -> bool {
        if sequence > self.highest {
            let shift = sequence - self.highest;
            self.bitmap = if shift >= REPLAY_WINDOW_SIZE {
                0
            } else {
                self.bitmap << shift
            };
            self.bitmap |= 1;
            self.highest = sequence;
            return true;
        }

        let offset = self.highest - sequence;
        if offset >= REPLAY_WINDOW_SIZE {
            return false;
        }
        let mask = 1u64 << offset;
        if self.bitmap & mask != 0 {
            return false;
        }
        self.bitmap |= mask;
        true
    }
}

/// Replay windows for every sender in a room, cleared on epoch transition.
#[derive(Debug, Default)]
pub struct SenderTracker {
    windows: HashMap<ParticipantId, ReplayWindow>,
}

impl SenderTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-mark for one sender, creating its window on first sight.
    pub fn validate_and_mark(&mut self, sender: &ParticipantId, sequence: u64) -> bool {
        self.windows
            .entry(*sender)
            .or_default()
            .validate_and_mark(sequence)
    }

    /// Drop one sender's window (leave/kick).
    pub fn remove(&mut self, sender: &ParticipantId) {
        self.windows.remove(sender);
    }

    /// Clear every window. Called on epoch transition, when sequence
    /// counters restart.
    pub fn reset(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_then_replay() {
        let mut window = ReplayWindow::new();
        assert!(window.validate_and_mark(1));
        assert!(window.validate_and_mark(2));
        assert!(window.validate_and_mark(3));
        // The replayed 2 must be rejected.
        assert!(!window.validate_and_mark(2));
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut window = ReplayWindow::new();
        assert!(window.validate_and_mark(5));
        assert!(window.validate_and_mark(3));
        assert!(window.validate_and_mark(4));
        assert!(window.validate_and_mark(1));

        assert!(!window.validate_and_mark(5));
        assert!(!window.validate_and_mark(3));
        assert!(!window.validate_and_mark(1));
        // 2 was never seen and is still inside the window.
        assert!(window.validate_and_mark(2));
    }

    #[test]
    fn test_below_window_rejected() {
        let mut window = ReplayWindow::new();
        assert!(window.validate_and_mark(100));

        // highest - 64 and below are gone regardless of the bitmap.
        assert!(!window.validate_and_mark(36));
        assert!(!window.validate_and_mark(1));
        // highest - 63 is the oldest acceptable slot.
        assert!(window.validate_and_mark(37));
    }

    #[test]
    fn test_large_jump_resets_bitmap() {
        let mut window = ReplayWindow::new();
        for seq in 1..=10 {
            assert!(window.validate_and_mark(seq));
        }
        assert!(window.validate_and_mark(10_000));
        // Everything before the jump fell out of the window.
        for seq in 1..=10 {
            assert!(!window.validate_and_mark(seq));
        }
        assert!(window.validate_and_mark(9_999));
    }

    #[test]
    fn test_accepts_exactly_once() {
        let mut window = ReplayWindow::new();
        for seq in 1..=200u64 {
            assert!(window.validate_and_mark(seq));
            assert!(!window.validate_and_mark(seq));
        }
    }

    #[test]
    fn test_tracker_isolates_senders() {
        let a = ParticipantId::from_bytes([0xA0; 16]);
        let b = ParticipantId::from_bytes([0xB0; 16]);
        let mut tracker = SenderTracker::new();

        assert!(tracker.validate_and_mark(&a, 1));
        // Same sequence from a different sender is fine.
        assert!(tracker.validate_and_mark(&b, 1));
        assert!(!tracker.validate_and_mark(&a, 1));
    }

    #[test]
    fn test_tracker_reset_on_epoch_transition() {
        let a = ParticipantId::from_bytes([0xA0; 16]);
        let mut tracker = SenderTracker::new();

        assert!(tracker.validate_and_mark(&a, 1));
        tracker.reset();
        // Sequence counters restart with the new epoch.
        assert!(tracker.validate_and_mark(&a, 1));
    }
}
