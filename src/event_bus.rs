//! Event envelope and broadcast stream

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, trace};

/// Envelope emitted for every lifecycle event of a connection.
///
/// Serializes with a `type` tag and a `data` payload, so downstream
/// consumers see e.g. `{"type": "message", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SocketEvent {
    /// The handshake completed and the connection is open
    Open(OpenInfo),
    /// The connection ended. Terminal: nothing follows this envelope.
    Close(CloseInfo),
    /// A text frame arrived and decoded as JSON
    Message(serde_json::Value),
    /// A text frame arrived but its payload was not valid JSON
    Malformed(MalformedFrame),
}

impl SocketEvent {
    /// Stable name of the envelope variant, used for logging and statistics
    pub fn kind(&self) -> &'static str {
        match self {
            SocketEvent::Open(_) => "open",
            SocketEvent::Close(_) => "close",
            SocketEvent::Message(_) => "message",
            SocketEvent::Malformed(_) => "malformed",
        }
    }
}

/// Details of a completed handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInfo {
    /// The address the connection was opened against
    pub url: String,
    /// HTTP status of the upgrade response
    pub status: u16,
}

/// Details of a connection ending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseInfo {
    /// Close code from the peer's close frame, or 1006 for abnormal closure
    pub code: u16,
    /// Close reason, or a transport diagnostic when no close frame was seen
    pub reason: String,
}

impl CloseInfo {
    /// Abnormal closure (code 1006): the transport died without completing
    /// a close handshake. Carries a diagnostic in place of a peer reason.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: 1006,
            reason: reason.into(),
        }
    }
}

/// A text frame whose payload failed JSON decoding.
///
/// Malformed input is surfaced to subscribers rather than tearing down the
/// connection or being dropped silently; delivery continues afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedFrame {
    /// The frame payload exactly as received
    pub raw: String,
    /// The decode error
    pub error: String,
}

/// Statistics about event bus activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Number of envelopes successfully published
    pub events_published: u64,
    /// Number of envelopes dropped (no subscribers)
    pub events_dropped: u64,
    /// Count of envelopes by kind
    pub kind_counts: HashMap<String, u64>,
}

/// Broadcast stream fanning envelopes out to all current subscribers.
///
/// Subscribers only observe envelopes published after they subscribe;
/// there is no replay for late joiners.
pub struct EventBus {
    /// The broadcast channel sender
    sender: broadcast::Sender<SocketEvent>,
    /// Configured capacity of the channel
    capacity: usize,
    /// Statistics about event bus activity
    stats: Arc<RwLock<BusStats>>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    pub fn new(capacity: usize) -> Self {
        info!(capacity, "Creating new event bus");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(RwLock::new(BusStats::default())),
        }
    }

    /// Get a receiver to subscribe to envelopes
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        trace!("New subscriber registered to event bus");
        self.sender.subscribe()
    }

    /// Publish an envelope to all subscribers, returning how many received it.
    ///
    /// Publishing with no subscribers is not an error: the envelope is
    /// dropped and counted in the statistics.
    pub async fn publish(&self, event: SocketEvent) -> usize {
        let kind = event.kind();
        trace!(kind, "Publishing envelope to bus");

        match self.sender.send(event) {
            Ok(receivers) => {
                let mut stats = self.stats.write().await;
                stats.events_published += 1;
                *stats.kind_counts.entry(kind.to_string()).or_insert(0) += 1;

                trace!(receivers, "Envelope published successfully");
                receivers
            }
            Err(_) => {
                // broadcast::send only fails when no receiver is subscribed
                let mut stats = self.stats.write().await;
                stats.events_dropped += 1;

                debug!(kind, "No subscribers for envelope, dropped");
                0
            }
        }
    }

    /// Get current event bus statistics
    pub async fn get_stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics counters
    pub async fn reset_stats(&self) {
        info!("Resetting event bus statistics");
        *self.stats.write().await = BusStats::default();
    }

    /// Get the configured capacity of the event bus
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            capacity: self.capacity,
            stats: Arc::clone(&self.stats),
        }
    }
}
