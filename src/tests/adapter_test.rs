//! Unit tests for the connection adapter
//!
//! Each test runs a scripted in-process WebSocket server and asserts on the
//! envelope sequence a subscriber observes. Tests use the current-thread
//! runtime, so subscribing right after construction is guaranteed to happen
//! before the connection worker publishes anything.

use tokio::net::TcpListener;
use tokio::sync::broadcast::error::TryRecvError;

use super::helpers::{next_event, scripted_server, ServerScript};
use crate::adapter::{ConnectionState, SocketAdapter};
use crate::event_bus::SocketEvent;

#[tokio::test]
async fn test_open_then_message() {
    let (url, _server) =
        scripted_server(ServerScript::SendThenClose(vec![r#"{"a":1}"#.to_string()])).await;

    let adapter = SocketAdapter::open(&url);
    assert_eq!(adapter.state(), ConnectionState::Connecting);
    let mut rx = adapter.subscribe();

    match next_event(&mut rx).await {
        SocketEvent::Open(info) => {
            assert_eq!(info.url, url);
            assert_eq!(info.status, 101);
        }
        other => panic!("expected open envelope, got {:?}", other),
    }
    assert_eq!(adapter.state(), ConnectionState::Open);

    match next_event(&mut rx).await {
        SocketEvent::Message(value) => assert_eq!(value, serde_json::json!({"a": 1})),
        other => panic!("expected message envelope, got {:?}", other),
    }

    match next_event(&mut rx).await {
        SocketEvent::Close(_) => {}
        other => panic!("expected close envelope, got {:?}", other),
    }
    assert_eq!(adapter.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_envelope_order_and_nothing_after_close() {
    let (url, _server) = scripted_server(ServerScript::SendThenClose(vec![
        r#"{"n":1}"#.to_string(),
        r#"{"n":2}"#.to_string(),
    ]))
    .await;

    let adapter = SocketAdapter::open(&url);
    let mut rx = adapter.subscribe();

    let mut kinds = Vec::new();
    for _ in 0..4 {
        kinds.push(next_event(&mut rx).await.kind());
    }
    assert_eq!(kinds, vec!["open", "message", "message", "close"]);

    // Close is terminal: nothing may follow it
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_malformed_frame_keeps_delivery_going() {
    let (url, _server) = scripted_server(ServerScript::SendThenClose(vec![
        "not-json".to_string(),
        r#"{"ok":true}"#.to_string(),
    ]))
    .await;

    let adapter = SocketAdapter::open(&url);
    let mut rx = adapter.subscribe();

    match next_event(&mut rx).await {
        SocketEvent::Open(_) => {}
        other => panic!("expected open envelope, got {:?}", other),
    }

    // The undecodable frame surfaces as a distinguished envelope with the
    // raw payload preserved
    match next_event(&mut rx).await {
        SocketEvent::Malformed(frame) => {
            assert_eq!(frame.raw, "not-json");
            assert!(!frame.error.is_empty());
        }
        other => panic!("expected malformed envelope, got {:?}", other),
    }

    // Delivery continues afterwards
    match next_event(&mut rx).await {
        SocketEvent::Message(value) => assert_eq!(value, serde_json::json!({"ok": true})),
        other => panic!("expected message envelope, got {:?}", other),
    }

    match next_event(&mut rx).await {
        SocketEvent::Close(_) => {}
        other => panic!("expected close envelope, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_before_open_does_not_error() {
    let (url, _server) = scripted_server(ServerScript::Echo).await;

    let adapter = SocketAdapter::open(&url);
    let mut rx = adapter.subscribe();

    // The handshake has not completed yet; the adapter must still accept
    // the frame and write it once the transport opens
    adapter.send(r#"{"ping":1}"#).unwrap();

    match next_event(&mut rx).await {
        SocketEvent::Open(_) => {}
        other => panic!("expected open envelope, got {:?}", other),
    }

    // Round-trip through the echo server
    match next_event(&mut rx).await {
        SocketEvent::Message(value) => assert_eq!(value, serde_json::json!({"ping": 1})),
        other => panic!("expected message envelope, got {:?}", other),
    }

    adapter.close();
    match next_event(&mut rx).await {
        SocketEvent::Close(_) => {}
        other => panic!("expected close envelope, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_twice_emits_single_close() {
    let (url, _server) = scripted_server(ServerScript::Echo).await;

    let adapter = SocketAdapter::open(&url);
    let mut rx = adapter.subscribe();

    match next_event(&mut rx).await {
        SocketEvent::Open(_) => {}
        other => panic!("expected open envelope, got {:?}", other),
    }

    adapter.close();
    adapter.close();

    match next_event(&mut rx).await {
        SocketEvent::Close(_) => {}
        other => panic!("expected close envelope, got {:?}", other),
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    // The connection has terminated; the transport-level failure now
    // surfaces from send
    assert!(adapter.send("{}").is_err());
}

#[tokio::test]
async fn test_handshake_failure_emits_close_without_open() {
    // Grab a port nothing is listening on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let adapter = SocketAdapter::open(format!("ws://{}/ws", addr));
    let mut rx = adapter.subscribe();

    match next_event(&mut rx).await {
        SocketEvent::Close(info) => {
            assert_eq!(info.code, 1006);
            assert!(!info.reason.is_empty());
        }
        other => panic!("expected close envelope, got {:?}", other),
    }
    assert_eq!(adapter.state(), ConnectionState::Closed);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
