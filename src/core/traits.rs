//! Core traits for Ephemeral Rooms endpoints.
//!
//! External collaborators (secure storage, capture-signal sources) are
//! reached through these seams so endpoints stay testable without a device.

use std::collections::HashMap;
use std::sync::Mutex;

/// Device-bound secure storage.
///
/// Semantics required of implementations: device-bound, available after
/// first unlock, never synced off the device. The protocol persists at most
/// one small boolean preference here - no message, key, roster, or history
/// is ever written.
pub trait SecureStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]);

    /// Remove the value stored under `key`.
    fn delete(&self, key: &str);
}

/// In-memory [`SecureStore`] for tests and headless environments.
///
/// Carries none of the device-binding guarantees; contents vanish with the
/// process, which is the correct failure direction for this protocol.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().expect("store lock poisoned").get(key).cloned()
    }

    fn put(&self, key: &str, value: &[u8]) {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), value.to_vec());
    }

    fn delete(&self, key: &str) {
        self.entries.lock().expect("store lock poisoned").remove(key);
    }
}

/// Best-effort device capture and lifecycle signals.
///
/// Each signal is an input to the session state machine: screenshots and
/// capture starts trigger a rekey and accelerate buffer expiry; backgrounding
/// and locking destroy the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSignal {
    /// A screenshot was taken of the conversation.
    ScreenshotTaken,
    /// Screen recording started.
    CaptureStarted,
    /// Screen recording stopped.
    CaptureStopped,
    /// The application moved to the background.
    Backgrounded,
    /// The device was locked.
    Locked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("transport-enabled").is_none());

        store.put("transport-enabled", &[1]);
        assert_eq!(store.get("transport-enabled"), Some(vec![1]));

        store.put("transport-enabled", &[0]);
        assert_eq!(store.get("transport-enabled"), Some(vec![0]));

        store.delete("transport-enabled");
        assert!(store.get("transport-enabled").is_none());
    }
}
