//! Integration tests for end-to-end WebSocket collaboration.
//!
//! These tests start a real relay and connect real clients, verifying the
//! full reconcile-and-rebroadcast pipeline.

use std::sync::Arc;
use diagram_relay::client::{ConnectionState, RelayClient, RelayEvent};
use diagram_relay::protocol::{Action, DocKey};
use diagram_relay::server::{RelayServer, ServerConfig};
use diagram_relay::{DmpPatchEngine, PatchEngine};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a relay on a free port, return it with its base URL.
async fn start_test_server() -> (Arc<RelayServer>, String) {
    start_test_server_with_capacity(64).await
}

async fn start_test_server_with_capacity(outbound_capacity: usize) -> (Arc<RelayServer>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        path_prefix: "/diagram".to_string(),
        outbound_capacity,
    };
    let server = Arc::new(RelayServer::new(config));
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, format!("ws://127.0.0.1:{port}/diagram"))
}

/// Connect a raw socket and wait until the relay has registered it.
async fn connect_raw(server: &RelayServer, base_url: &str, room: &str, expected_members: usize) -> Socket {
    let (socket, _) = tokio_tungstenite::connect_async(format!("{base_url}/{room}"))
        .await
        .unwrap();
    wait_for_members(server, room, expected_members).await;
    socket
}

async fn wait_for_members(server: &RelayServer, room: &str, expected: usize) {
    for _ in 0..100 {
        if server.hub().registry().members_of(room).await.len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room {room} never reached {expected} members");
}

async fn next_text(socket: &mut Socket) -> String {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return text.as_str().to_owned();
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let result = timeout(Duration::from_millis(150), socket.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

const EDIT: &str = r#"{"action":"textEditOT","elementId":"e1","partId":"p1","originalText":"hello","newText":"hello world"}"#;

#[tokio::test]
async fn test_server_accepts_connections() {
    let (server, url) = start_test_server().await;
    let _socket = connect_raw(&server, &url, "ex1", 1).await;

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_rooms, 1);
}

#[tokio::test]
async fn test_edit_scenario_three_sessions() {
    let (server, url) = start_test_server().await;
    let mut s1 = connect_raw(&server, &url, "ex1", 1).await;
    let mut s2 = connect_raw(&server, &url, "ex1", 2).await;
    let mut s3 = connect_raw(&server, &url, "ex1", 3).await;

    s1.send(Message::text(EDIT)).await.unwrap();

    for socket in [&mut s2, &mut s3] {
        let frame = next_text(socket).await;
        match Action::from_json(&frame).unwrap() {
            Action::ApplyPatch(patch) => {
                assert_eq!(patch.element_id, "e1");
                assert_eq!(patch.part_id, "p1");
                let engine = DmpPatchEngine::new();
                let script = engine.deserialize(&patch.patch).unwrap();
                assert_eq!(engine.apply(&script, "hello").unwrap().text, "hello world");
            }
            other => panic!("expected applyPatch, got {other:?}"),
        }
    }
    assert_silent(&mut s1).await;

    let key = DocKey::new("e1", "p1");
    let registry = server.hub().registry();
    assert_eq!(registry.document_text("ex1", &key, "").await, "hello world");

    // S2 leaves; the room and its documents survive
    s2.close(None).await.unwrap();
    wait_for_members(&server, "ex1", 2).await;
    assert_eq!(registry.document_text("ex1", &key, "").await, "hello world");
    drop(s3);
}

#[tokio::test]
async fn test_sync_passthrough_byte_identical() {
    let (server, url) = start_test_server().await;
    let mut s1 = connect_raw(&server, &url, "ex1", 1).await;
    let mut s2 = connect_raw(&server, &url, "ex1", 2).await;

    let raw = r#"{"action":"sync",   "url":"http://host/drawer?exercise=ex1"}"#;
    s1.send(Message::text(raw)).await.unwrap();

    assert_eq!(next_text(&mut s2).await, raw);
    assert_silent(&mut s1).await;
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (server, url) = start_test_server().await;
    let mut a1 = connect_raw(&server, &url, "r1", 1).await;
    let mut a2 = connect_raw(&server, &url, "r1", 2).await;
    let mut b1 = connect_raw(&server, &url, "r2", 1).await;

    a1.send(Message::text(EDIT)).await.unwrap();
    next_text(&mut a2).await;
    assert_silent(&mut b1).await;

    let key = DocKey::new("e1", "p1");
    let registry = server.hub().registry();
    assert_eq!(registry.document_text("r2", &key, "none").await, "none");
}

#[tokio::test]
async fn test_room_teardown_on_last_leave() {
    let (server, url) = start_test_server().await;
    let mut s1 = connect_raw(&server, &url, "ex1", 1).await;
    s1.send(Message::text(EDIT)).await.unwrap();

    let key = DocKey::new("e1", "p1");
    let registry = server.hub().registry().clone();
    for _ in 0..100 {
        if registry.document_text("ex1", &key, "").await == "hello world" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    s1.close(None).await.unwrap();
    wait_for_members(&server, "ex1", 0).await;
    assert_eq!(registry.room_count().await, 0);
    assert_eq!(registry.document_text("ex1", &key, "fallback").await, "fallback");
}

#[tokio::test]
async fn test_malformed_edit_relayed_verbatim() {
    let (server, url) = start_test_server().await;
    let mut s1 = connect_raw(&server, &url, "ex1", 1).await;
    let mut s2 = connect_raw(&server, &url, "ex1", 2).await;

    let raw = r#"{"action":"textEditOT","elementId":"e1","newText":"half"}"#;
    s1.send(Message::text(raw)).await.unwrap();

    assert_eq!(next_text(&mut s2).await, raw);
    assert_eq!(server.stats().await.relay.fallbacks, 1);
}

#[tokio::test]
async fn test_clients_converge() {
    let (_server, url) = start_test_server().await;

    let mut alice = RelayClient::new("ex7", &url);
    let mut alice_events = alice.take_event_rx().unwrap();
    alice.connect().await.unwrap();
    assert_eq!(
        timeout(Duration::from_secs(1), alice_events.recv()).await.unwrap(),
        Some(RelayEvent::Connected)
    );

    let mut bob = RelayClient::new("ex7", &url);
    let mut bob_events = bob.take_event_rx().unwrap();
    bob.connect().await.unwrap();
    let _ = timeout(Duration::from_secs(1), bob_events.recv()).await; // Connected
    assert_eq!(bob.connection_state().await, ConnectionState::Connected);

    let key = DocKey::new("cls1", "name");
    alice.set_local_text(key.clone(), "Order").await;
    bob.set_local_text(key.clone(), "Order").await;

    // Let both joins land before editing
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.send_edit("cls1", "name", "OrderLine").await.unwrap();

    let event = timeout(Duration::from_secs(2), bob_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        RelayEvent::PatchApplied {
            doc_key: key.clone(),
            text: "OrderLine".to_string(),
            clean: true,
        }
    );
    assert_eq!(bob.local_text(&key).await.as_deref(), Some("OrderLine"));
    assert_eq!(alice.local_text(&key).await.as_deref(), Some("OrderLine"));

    bob.send_sync("http://host/exercise/ex7").await.unwrap();
    let event = timeout(Duration::from_secs(2), alice_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        RelayEvent::Sync {
            url: "http://host/exercise/ex7".to_string()
        }
    );
}

#[tokio::test]
async fn test_sender_disconnect_mid_room_keeps_others_served() {
    let (server, url) = start_test_server().await;
    let s1 = connect_raw(&server, &url, "ex1", 1).await;
    let mut s2 = connect_raw(&server, &url, "ex1", 2).await;
    let mut s3 = connect_raw(&server, &url, "ex1", 3).await;

    drop(s1);
    wait_for_members(&server, "ex1", 2).await;

    s3.send(Message::text(EDIT)).await.unwrap();
    assert!(next_text(&mut s2).await.contains("applyPatch"));
    assert_silent(&mut s3).await;
}

#[tokio::test]
async fn test_client_keeps_applying_patches_without_event_consumer() {
    let (server, url) = start_test_server_with_capacity(1024).await;

    // Never takes its event receiver
    let mut bob = RelayClient::new("ex8", &url);
    bob.connect().await.unwrap();
    wait_for_members(&server, "ex8", 1).await;
    let mut peer = connect_raw(&server, &url, "ex8", 2).await;

    let mut text = String::new();
    for i in 0..300 {
        let original = text.clone();
        text.push(char::from(b'0' + (i % 10) as u8));
        let edit = serde_json::json!({
            "action": "textEditOT",
            "elementId": "cls1",
            "partId": "name",
            "originalText": original,
            "newText": text,
        });
        peer.send(Message::text(edit.to_string())).await.unwrap();
    }

    let key = DocKey::new("cls1", "name");
    let registry = server.hub().registry().clone();
    for _ in 0..300 {
        if bob.local_text(&key).await.as_deref() == Some(text.as_str()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.document_text("ex8", &key, "").await, text);
    assert_eq!(bob.local_text(&key).await.as_deref(), Some(text.as_str()));
}
