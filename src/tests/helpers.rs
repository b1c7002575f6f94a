//! Shared helpers for socket tests

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::event_bus::SocketEvent;

/// What a scripted test server does with the one connection it accepts
pub enum ServerScript {
    /// Send these text frames, then close the connection
    SendThenClose(Vec<String>),
    /// Echo every received text frame back to the client
    Echo,
}

/// Bind an ephemeral port and serve a single connection according to the
/// script. Returns the `ws://` URL to connect to.
pub async fn scripted_server(script: ServerScript) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws_stream = accept_async(stream).await.unwrap();
        let (mut sender, mut receiver) = ws_stream.split();

        match script {
            ServerScript::SendThenClose(frames) => {
                for frame in frames {
                    sender.send(Message::text(frame)).await.unwrap();
                }
                sender.send(Message::Close(None)).await.unwrap();
                // drain until the client finishes the close handshake
                while let Some(Ok(_)) = receiver.next().await {}
            }
            ServerScript::Echo => {
                while let Some(Ok(msg)) = receiver.next().await {
                    match msg {
                        Message::Text(text) => {
                            sender.send(Message::Text(text)).await.unwrap();
                        }
                        Message::Close(frame) => {
                            let _ = sender.send(Message::Close(frame)).await;
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    (format!("ws://{}/ws", addr), handle)
}

/// Receive the next envelope, failing the test after five seconds
pub async fn next_event(rx: &mut broadcast::Receiver<SocketEvent>) -> SocketEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("event stream closed")
}
