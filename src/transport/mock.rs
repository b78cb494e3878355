//! In-memory transport for tests.
//!
//! A [`MockTransport`] pairs with a [`MockRemote`] acting as the far side of
//! the wire: the test inspects what the session sent and injects inbound
//! frames or connection events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::wire::WireMessage;
use super::{FramePriority, Transport, TransportEvent};
use crate::core::TransportError;

/// Mock transport handle given to the session under test.
pub struct MockTransport {
    outbound: mpsc::UnboundedSender<(WireMessage, FramePriority)>,
    closed: Arc<AtomicBool>,
}

/// The far side of a [`MockTransport`].
pub struct MockRemote {
    /// Frames the session sent, in order.
    pub sent: mpsc::UnboundedReceiver<(WireMessage, FramePriority)>,
    inbound: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a connected pair: the session-side transport, its event
    /// inbox, and the test-side remote.
    pub fn pair() -> (Self, mpsc::Receiver<TransportEvent>, MockRemote) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let closed = Arc::new(AtomicBool::new(false));

        (
            Self {
                outbound: outbound_tx,
                closed: closed.clone(),
            },
            inbound_rx,
            MockRemote {
                sent: outbound_rx,
                inbound: inbound_tx,
                closed,
            },
        )
    }
}

impl Transport for MockTransport {
    fn send(&self, message: WireMessage, priority: FramePriority) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotReady);
        }
        self.outbound
            .send((message, priority))
            .map_err(|_| TransportError::Disconnected)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl MockRemote {
    /// Inject an inbound wire frame as if it arrived from the relay.
    pub async fn push(&self, message: WireMessage) {
        let _ = self.inbound.send(TransportEvent::Message(message)).await;
    }

    /// Inject a raw transport event.
    pub async fn push_event(&self, event: TransportEvent) {
        let _ = self.inbound.send(event).await;
    }

    /// Whether the session closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pop the next frame the session sent, if any is already queued.
    pub fn try_sent(&mut self) -> Option<(WireMessage, FramePriority)> {
        self.sent.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_pair_roundtrip() {
        let (transport, mut inbox, mut remote) = MockTransport::pair();

        transport
            .send(WireMessage::Heartbeat, FramePriority::Control)
            .unwrap();
        let (sent, priority) = remote.sent.recv().await.unwrap();
        assert_eq!(sent, WireMessage::Heartbeat);
        assert_eq!(priority, FramePriority::Control);

        remote.push(WireMessage::HeartbeatAck).await;
        match inbox.recv().await.unwrap() {
            TransportEvent::Message(WireMessage::HeartbeatAck) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_close_is_visible_to_remote() {
        let (transport, _inbox, remote) = MockTransport::pair();
        assert!(!remote.is_closed());
        transport.close();
        assert!(remote.is_closed());
        assert!(transport
            .send(WireMessage::Heartbeat, FramePriority::Control)
            .is_err());
    }
}
