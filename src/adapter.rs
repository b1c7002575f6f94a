//! Connection adapter
//!
//! Owns exactly one WebSocket connection for its lifetime and republishes
//! the connection's lifecycle events (open, close, message) through a
//! broadcast stream. The connection is never replaced: once it has closed,
//! the adapter stays closed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::SocketConfig;
use crate::error::{self, SocketResult};
use crate::event_bus::{CloseInfo, EventBus, MalformedFrame, OpenInfo, SocketEvent};

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// The transport's native connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_CONNECTING => ConnectionState::Connecting,
            STATE_OPEN => ConnectionState::Open,
            STATE_CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Outbound requests relayed to the connection worker
enum Command {
    Send(String),
    Close,
}

/// Adapter bridging one WebSocket connection to a broadcast stream.
///
/// Construction starts connecting immediately; all outcomes, including
/// handshake failure, are observed through the event stream. `send` and
/// `close` hand the request to the connection worker and return without
/// waiting for the transport.
pub struct SocketAdapter {
    /// Fixed target address
    url: String,
    /// Event bus carrying this connection's envelopes
    bus: EventBus,
    /// Channel to the connection worker
    commands: mpsc::UnboundedSender<Command>,
    /// Native state, mirrored by the worker for observability
    state: Arc<AtomicU8>,
}

impl SocketAdapter {
    /// Open a connection to `url` with default settings.
    ///
    /// Never fails synchronously: a rejected address surfaces as a `Close`
    /// envelope with no preceding `Open`.
    pub fn open(url: impl Into<String>) -> Self {
        Self::with_config(SocketConfig::new(url))
    }

    /// Open a connection with explicit settings
    pub fn with_config(config: SocketConfig) -> Self {
        let bus = EventBus::new(config.capacity);
        let state = Arc::new(AtomicU8::new(STATE_CONNECTING));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let worker_url = config.url.clone();
        let worker_bus = bus.clone();
        let worker_state = Arc::clone(&state);
        tokio::spawn(async move {
            run_connection(worker_url, worker_bus, worker_state, command_rx).await;
        });

        Self {
            url: config.url,
            bus,
            commands,
            state,
        }
    }

    /// Relay `payload` verbatim to the transport as a single text frame.
    ///
    /// No state pre-check is performed: frames handed over before the
    /// handshake completes are written once the transport opens. Fails only
    /// once the connection has terminated and the worker is gone.
    pub fn send(&self, payload: impl Into<String>) -> SocketResult<()> {
        self.commands
            .send(Command::Send(payload.into()))
            .map_err(|_| error::send_failed(self.url.as_str(), "connection is closed"))
    }

    /// Request transport closure.
    ///
    /// The close handshake completes asynchronously and produces the `Close`
    /// envelope. Repeated calls are no-ops; at most one `Close` envelope is
    /// ever published per connection.
    pub fn close(&self) {
        if self.commands.send(Command::Close).is_err() {
            debug!(url = %self.url, "Close requested after connection already ended");
        }
    }

    /// Subscribe to the live event stream.
    ///
    /// New subscribers only observe envelopes published after this call;
    /// dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.bus.subscribe()
    }

    /// The event bus carrying this connection's envelopes
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// The address this adapter was constructed with
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current native state of the connection
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Connection worker: performs the handshake, then pumps frames and
/// outbound commands until the connection ends. Publishes the `Close`
/// envelope exactly once, from a single exit path.
async fn run_connection(
    url: String,
    bus: EventBus,
    state: Arc<AtomicU8>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    info!(url = %url, "Connecting");

    let (ws_stream, response) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(url = %url, error = %e, "WebSocket handshake failed");
            state.store(STATE_CLOSED, Ordering::SeqCst);
            bus.publish(SocketEvent::Close(CloseInfo::abnormal(format!(
                "handshake failed: {}",
                e
            ))))
            .await;
            return;
        }
    };

    let status = response.status().as_u16();
    state.store(STATE_OPEN, Ordering::SeqCst);
    info!(url = %url, status, "WebSocket connection established");
    bus.publish(SocketEvent::Open(OpenInfo {
        url: url.clone(),
        status,
    }))
    .await;

    let (mut sink, mut stream) = ws_stream.split();
    let mut close_requested = false;

    let close_info = loop {
        tokio::select! {
            command = commands.recv(), if !close_requested => {
                match command {
                    Some(Command::Send(payload)) => {
                        if let Err(e) = sink.send(Message::text(payload)).await {
                            error!(url = %url, error = %e, "Failed to write frame");
                            break CloseInfo::abnormal(format!("send failed: {}", e));
                        }
                    }
                    Some(Command::Close) => {
                        debug!(url = %url, "Close requested by caller");
                        close_requested = true;
                        state.store(STATE_CLOSING, Ordering::SeqCst);
                        if let Err(e) = sink.send(Message::Close(None)).await {
                            debug!(url = %url, error = %e, "Close frame not sent, transport already down");
                            break CloseInfo::abnormal(format!("close failed: {}", e));
                        }
                    }
                    None => {
                        // every adapter handle is gone; shut the connection down
                        close_requested = true;
                        state.store(STATE_CLOSING, Ordering::SeqCst);
                        let _ = sink.send(Message::Close(None)).await;
                    }
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) => {
                                bus.publish(SocketEvent::Message(value)).await;
                            }
                            Err(e) => {
                                warn!(url = %url, error = %e, "Inbound frame is not valid JSON");
                                bus.publish(SocketEvent::Malformed(MalformedFrame {
                                    raw: text.to_string(),
                                    error: e.to_string(),
                                }))
                                .await;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(url = %url, len = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => CloseInfo {
                                code: u16::from(f.code),
                                reason: f.reason.to_string(),
                            },
                            // peer closed without a status code
                            None => CloseInfo {
                                code: 1005,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(_)) => {
                        // ping/pong, handled by the transport
                    }
                    Some(Err(e)) => {
                        error!(url = %url, error = %e, "Transport error");
                        break CloseInfo::abnormal(e.to_string());
                    }
                    None => {
                        break CloseInfo::abnormal("connection reset");
                    }
                }
            }
        }
    };

    state.store(STATE_CLOSED, Ordering::SeqCst);
    info!(url = %url, code = close_info.code, reason = %close_info.reason, "WebSocket connection closed");
    bus.publish(SocketEvent::Close(close_info)).await;
}
