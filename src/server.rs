//! Broadcast relay server
//!
//! The server side of the bridge: accepts WebSocket clients, assigns each a
//! UUID, announces joins and leaves, and fans every inbound text frame out
//! to all other connected clients as a JSON message.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Bytes, Message},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{self, SocketError, SocketResult};

const CONNECT_ANNOUNCEMENT: &str = "/A new socket has connected.";
const DISCONNECT_ANNOUNCEMENT: &str = "/A socket has disconnected.";

/// Buffer size of the internal fan-out channel
const FRAME_BUFFER: usize = 256;

/// A message delivered to relay clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Id of the client the content came from; absent for server announcements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Uuid>,
    /// The frame text as the sender transmitted it
    pub content: String,
    /// When the relay produced this message
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RelayMessage {
    fn announcement(content: &str) -> Self {
        Self {
            sender: None,
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    fn from_client(sender: Uuid, content: String) -> Self {
        Self {
            sender: Some(sender),
            content,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// A serialized message on the fan-out channel. Delivery skips the
/// originating client.
#[derive(Debug, Clone)]
struct RelayFrame {
    origin: Uuid,
    payload: String,
}

/// WebSocket relay server broadcasting client messages to all other clients
pub struct RelayServer {
    /// Configuration for the relay server
    config: RelayConfig,
    /// Fan-out channel shared by all client tasks
    frames: broadcast::Sender<RelayFrame>,
    /// Address the listener is bound to, once started
    local_addr: Option<SocketAddr>,
    /// Handle to the running server task
    server_handle: Option<tokio::task::JoinHandle<()>>,
    /// Sender for shutdown signal
    shutdown_sender: Option<mpsc::Sender<()>>,
    /// Active connections counter
    connections: Arc<AtomicUsize>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayConfig) -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            config,
            frames,
            local_addr: None,
            server_handle: None,
            shutdown_sender: None,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the listener and start serving in a background task
    pub async fn start(&mut self) -> SocketResult<()> {
        if self.server_handle.is_some() {
            warn!("Relay server already running");
            return Err(SocketError::ServerAlreadyRunning);
        }

        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| error::bind_failed(e))?;
        let local_addr = listener.local_addr().map_err(|e| error::bind_failed(e))?;
        self.local_addr = Some(local_addr);

        info!(%local_addr, "Relay server listening");

        let (shutdown_sender, mut shutdown_receiver) = mpsc::channel::<()>(1);
        self.shutdown_sender = Some(shutdown_sender);

        let config = self.config.clone();
        let frames = self.frames.clone();
        let connections = Arc::clone(&self.connections);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Check for shutdown signal
                    _ = shutdown_receiver.recv() => {
                        info!("Relay server shutting down");
                        break;
                    }

                    // Accept new connections
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer_addr)) => {
                                let current_count = connections.load(Ordering::SeqCst);
                                if current_count >= config.max_connections {
                                    warn!(
                                        client = %peer_addr,
                                        max_connections = config.max_connections,
                                        current_connections = current_count,
                                        "Maximum relay connections reached, rejecting new connection"
                                    );
                                    // dropping the stream closes it
                                    continue;
                                }

                                connections.fetch_add(1, Ordering::SeqCst);
                                info!(
                                    client = %peer_addr,
                                    connections = current_count + 1,
                                    "New relay connection"
                                );

                                let frames_clone = frames.clone();
                                let counter_clone = Arc::clone(&connections);
                                let ping_interval = config.ping_interval_secs;

                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(stream, frames_clone, ping_interval).await {
                                        error!(error = %e, client = %peer_addr, "Error in relay connection");
                                    }

                                    counter_clone.fetch_sub(1, Ordering::SeqCst);
                                    let remaining = counter_clone.load(Ordering::SeqCst);
                                    debug!(client = %peer_addr, remaining_connections = remaining, "Client disconnected");
                                });
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to accept relay connection");
                            }
                        }
                    }
                }
            }
        });

        self.server_handle = Some(handle);
        Ok(())
    }

    /// Stop the relay server
    pub async fn stop(&mut self) -> SocketResult<()> {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(()).await;

            if let Some(handle) = self.server_handle.take() {
                let _ = handle.await;
            }

            Ok(())
        } else {
            Err(SocketError::ServerNotRunning)
        }
    }

    /// Address the server is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Publish a message on the fan-out channel. A send error only means no
/// other client is connected to receive it.
fn broadcast_message(frames: &broadcast::Sender<RelayFrame>, origin: Uuid, message: &RelayMessage) {
    match serde_json::to_string(message) {
        Ok(payload) => {
            let _ = frames.send(RelayFrame { origin, payload });
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize relay message");
        }
    }
}

/// Handle a client connection for its whole lifetime
async fn handle_client(
    stream: TcpStream,
    frames: broadcast::Sender<RelayFrame>,
    ping_interval: u64,
) -> SocketResult<()> {
    let peer_addr = stream
        .peer_addr()
        .map_or("unknown".to_string(), |addr| addr.to_string());

    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| error::accept_failed(e))?;

    let id = Uuid::new_v4();
    info!(client = %peer_addr, %id, "Relay client connected");

    let mut receiver = frames.subscribe();

    // announce the join to everyone already connected
    broadcast_message(&frames, id, &RelayMessage::announcement(CONNECT_ANNOUNCEMENT));

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut messages_relayed = 0u64;

    loop {
        tokio::select! {
            // Deliver frames from other clients
            result = receiver.recv() => {
                match result {
                    Ok(frame) => {
                        if frame.origin == id {
                            continue;
                        }
                        if let Err(e) = ws_sender.send(Message::text(frame.payload)).await {
                            error!(error = %e, client = %peer_addr, "Error sending relay message");
                            break;
                        }
                        messages_relayed += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client = %peer_addr, skipped, "Relay client lagged behind fan-out channel");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!(client = %peer_addr, "Fan-out channel closed");
                        break;
                    }
                }
            }

            // Handle incoming frames from this client
            result = ws_receiver.next() => {
                match result {
                    Some(Ok(msg)) => {
                        match msg {
                            Message::Text(text) => {
                                debug!(client = %peer_addr, %id, "Relaying text frame");
                                broadcast_message(
                                    &frames,
                                    id,
                                    &RelayMessage::from_client(id, text.to_string()),
                                );
                            }
                            Message::Close(_) => {
                                info!(client = %peer_addr, "Relay client requested close");
                                break;
                            }
                            Message::Ping(data) => {
                                debug!(client = %peer_addr, "Received ping");
                                if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                    error!(error = %e, client = %peer_addr, "Error responding to ping");
                                    break;
                                }
                            }
                            Message::Pong(_) => {
                                debug!(client = %peer_addr, "Received pong");
                            }
                            _ => {
                                debug!(client = %peer_addr, "Ignoring non-text frame");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, client = %peer_addr, "WebSocket error from client");
                        break;
                    }
                    None => {
                        info!(client = %peer_addr, "Relay client disconnected");
                        break;
                    }
                }
            }

            // Periodic ping to check the client is still alive
            _ = sleep(Duration::from_secs(ping_interval)) => {
                debug!(client = %peer_addr, ping_interval, "Sending ping");
                if let Err(e) = ws_sender.send(Message::Ping(Bytes::new())).await {
                    error!(error = %e, client = %peer_addr, "Error sending ping");
                    break;
                }
            }
        }
    }

    // announce the leave to the clients that remain
    broadcast_message(
        &frames,
        id,
        &RelayMessage::announcement(DISCONNECT_ANNOUNCEMENT),
    );

    info!(client = %peer_addr, %id, messages = messages_relayed, "Relay client unregistered");
    Ok(())
}
