//! WebSocket transport adapter.
//!
//! One writer task drains the bounded outbound queue; one reader task
//! parses inbound text frames into the session inbox. Connection loss
//! triggers bounded exponential backoff (1 s doubling to 30 s); frames
//! enqueued while disconnected flush after reconnect. Reconnection
//! exhaustion surfaces `Disconnected` and the session destroys itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::wire::{self, WireMessage};
use super::{FramePriority, Transport, TransportEvent};
use crate::core::{
    TransportError, MAX_WIRE_FRAME_SIZE, OUTBOUND_QUEUE_DEPTH, RECONNECT_BACKOFF_INITIAL,
    RECONNECT_BACKOFF_MAX, RECONNECT_MAX_ATTEMPTS,
};

/// WebSocket adapter configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Relay endpoint URL (`wss://…/rooms/{roomId}` or the join variant).
    pub url: String,
    /// Permit non-hidden-service hosts. Development only; the default
    /// posture refuses any URL that is not a v3 onion address.
    pub allow_clearnet: bool,
}

impl WsConfig {
    /// Config for a relay URL with the default (onion-only) posture.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            allow_clearnet: false,
        }
    }

    /// Permit clearnet hosts (development relays, tests).
    pub fn allow_clearnet(mut self, allow: bool) -> Self {
        self.allow_clearnet = allow;
        self
    }
}

/// Whether a URL's host looks like a v3 hidden service.
///
/// V3 onion hostnames are exactly 56 base32 characters before `.onion`.
pub fn is_hidden_service_url(url: &str) -> bool {
    let Some(rest) = url.split("://").nth(1) else {
        return false;
    };
    let host_port = rest.split('/').next().unwrap_or(rest);
    let host = host_port.split(':').next().unwrap_or(host_port);
    let Some(label) = host.strip_suffix(".onion") else {
        return false;
    };
    label.len() == 56
        && label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
}

type QueueEntry = (WireMessage, FramePriority);

struct Shared {
    queue: Mutex<VecDeque<QueueEntry>>,
    /// Wakes the writer when a frame is enqueued.
    wakeup: Notify,
    closed: AtomicBool,
}

/// The WebSocket transport handle held by the session.
pub struct WsTransport {
    shared: Arc<Shared>,
}

impl WsTransport {
    /// Validate the URL policy and spawn the connection task.
    ///
    /// Returns the send handle and the event inbox. The connection is
    /// established asynchronously; the first event is either `Connected` or
    /// a `Reconnecting`/`Disconnected` progression.
    pub fn connect(
        config: WsConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        if !config.allow_clearnet && !is_hidden_service_url(&config.url) {
            return Err(TransportError::ConnectFailed(
                "host is not a recognized hidden service".into(),
            ));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let (event_tx, event_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        tokio::spawn(connection_loop(config, shared.clone(), event_tx));

        Ok((Self { shared }, event_rx))
    }
}

impl Transport for WsTransport {
    fn send(&self, message: WireMessage, priority: FramePriority) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotReady);
        }

        let mut queue = self.shared.queue.lock().expect("queue lock poisoned");
        if queue.len() >= OUTBOUND_QUEUE_DEPTH {
            // Shed the oldest droppable frame to make room.
            let victim = queue.iter().position(|(_, p)| p.droppable());
            match victim {
                Some(index) => {
                    queue.remove(index);
                    debug!("outbound queue full, dropped oldest droppable frame");
                }
                None if priority.droppable() => {
                    // Nothing sheddable and the newcomer is sheddable itself.
                    debug!("outbound queue full of control frames, dropped new frame");
                    return Ok(());
                }
                None => {
                    // Control overflow is unrecoverable by contract.
                    drop(queue);
                    self.close();
                    return Err(TransportError::NotReady);
                }
            }
        }
        queue.push_back((message, priority));
        drop(queue);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wakeup.notify_waiters();
    }
}

async fn connection_loop(
    config: WsConfig,
    shared: Arc<Shared>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut backoff = RECONNECT_BACKOFF_INITIAL;
    let mut attempt: u32 = 0;

    loop {
        if shared.closed.load(Ordering::Acquire) {
            return;
        }

        match connect_async(&config.url).await {
            Ok((stream, _response)) => {
                attempt = 0;
                backoff = RECONNECT_BACKOFF_INITIAL;
                if events.send(TransportEvent::Connected).await.is_err() {
                    return;
                }

                let (mut sink, mut source) = stream.split();
                let write = drain_queue(&shared, &mut sink);
                let read = pump_inbound(&mut source, &events);

                tokio::select! {
                    _ = write => debug!("transport writer stopped"),
                    _ = read => debug!("transport reader stopped"),
                }

                if shared.closed.load(Ordering::Acquire) {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            }
            Err(e) => {
                warn!("transport connect failed: {e}");
            }
        }

        attempt += 1;
        if attempt > RECONNECT_MAX_ATTEMPTS {
            let _ = events.send(TransportEvent::Disconnected).await;
            shared.closed.store(true, Ordering::Release);
            return;
        }
        if events
            .send(TransportEvent::Reconnecting { attempt })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
    }
}

/// Pop queued frames in order and write them to the sink. Returns when the
/// transport is closed or the sink errors (triggering reconnect; unwritten
/// frames stay queued).
async fn drain_queue<S>(shared: &Arc<Shared>, sink: &mut S)
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    loop {
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        let next = shared
            .queue
            .lock()
            .expect("queue lock poisoned")
            .pop_front();
        match next {
            Some((message, priority)) => {
                let text = match wire::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("dropping unencodable outbound frame: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    // Requeue at the front so ordering survives reconnect.
                    shared
                        .queue
                        .lock()
                        .expect("queue lock poisoned")
                        .push_front((message, priority));
                    return;
                }
            }
            None => shared.wakeup.notified().await,
        }
    }
}

/// Parse inbound frames into transport events. Returns on close or error.
async fn pump_inbound<S>(source: &mut S, events: &mpsc::Sender<TransportEvent>)
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(item) = source.next().await {
        let text = match item {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(_) => continue,
        };
        if text.len() > MAX_WIRE_FRAME_SIZE {
            warn!("dropping oversize inbound frame ({} bytes)", text.len());
            continue;
        }
        match wire::decode(&text) {
            Ok(message) => {
                if events.send(TransportEvent::Message(message)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("dropping unparseable inbound frame: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_service_detection() {
        let onion = format!("wss://{}.onion/rooms/abc", "a".repeat(56));
        assert!(is_hidden_service_url(&onion));

        let onion_with_port = format!("wss://{}.onion:443/rooms/abc", "b".repeat(56));
        assert!(is_hidden_service_url(&onion_with_port));

        // v2 addresses (16 chars) are retired.
        let v2 = format!("wss://{}.onion/rooms/abc", "c".repeat(16));
        assert!(!is_hidden_service_url(&v2));

        assert!(!is_hidden_service_url("wss://relay.example.com/rooms/abc"));
        assert!(!is_hidden_service_url("wss://127.0.0.1:8080/rooms/abc"));
        assert!(!is_hidden_service_url("not a url"));

        // Base32 alphabet excludes 0, 1, 8, 9.
        let bad_alphabet = format!("wss://{}0.onion/x", "a".repeat(55));
        assert!(!is_hidden_service_url(&bad_alphabet));
    }

    #[tokio::test]
    async fn test_clearnet_refused_by_default() {
        let result = WsTransport::connect(WsConfig::new("wss://relay.example.com/rooms/x"));
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_clearnet_allowed_when_configured() {
        // Connection will fail later (nothing is listening), but policy
        // admits the URL and the handle is returned.
        let result = WsTransport::connect(
            WsConfig::new("ws://127.0.0.1:1/rooms/x").allow_clearnet(true),
        );
        assert!(result.is_ok());
        let (transport, _events) = result.unwrap();
        transport.close();
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _events) = WsTransport::connect(
            WsConfig::new("ws://127.0.0.1:1/rooms/x").allow_clearnet(true),
        )
        .unwrap();
        transport.close();
        assert!(matches!(
            transport.send(WireMessage::Heartbeat, FramePriority::Control),
            Err(TransportError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_backpressure_sheds_droppable_first() {
        let (transport, _events) = WsTransport::connect(
            WsConfig::new("ws://127.0.0.1:1/rooms/x").allow_clearnet(true),
        )
        .unwrap();

        // Fill the queue with droppable frames.
        for _ in 0..OUTBOUND_QUEUE_DEPTH {
            transport
                .send(
                    WireMessage::Broadcast {
                        payload: "AA==".into(),
                    },
                    FramePriority::Droppable,
                )
                .unwrap();
        }
        // A control frame still gets through by evicting the oldest chat.
        transport
            .send(WireMessage::Heartbeat, FramePriority::Control)
            .unwrap();
        // And rekey-bearing frames are likewise never refused here.
        transport
            .send(
                WireMessage::Direct {
                    client_id: "c1".into(),
                    payload: "AA==".into(),
                },
                FramePriority::RekeyBearing,
            )
            .unwrap();
        transport.close();
    }
}
