//! End-to-end tests driving the server with real WebSocket clients.

use beacon_core::UserId;
use beacon_protocol::{codec, error_codes, Frame};
use beacon_server::{serve, AppState, Config};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start(config: Config) -> (SocketAddr, Arc<AppState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(config));
    tokio::spawn(serve(listener, Arc::clone(&state)));
    (addr, state)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws?{query}")).await.unwrap();
    ws
}

async fn next_frame(ws: &mut Client) -> Frame {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return codec::decode_json(&text).unwrap(),
            Message::Binary(data) => return codec::decode(&data).unwrap(),
            _ => continue,
        }
    }
}

async fn next_roster(ws: &mut Client) -> Vec<String> {
    loop {
        if let Frame::OnlineRoster { users } = next_frame(ws).await {
            return users;
        }
    }
}

async fn send(ws: &mut Client, frame: &Frame) {
    ws.send(Message::Text(codec::encode_json(frame).unwrap()))
        .await
        .unwrap();
}

/// Poll until the server has processed pending disconnects.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_connect_sends_connected_then_roster() {
    let (addr, _state) = start(Config::default()).await;
    let mut alice = connect(addr, "userId=alice").await;

    match next_frame(&mut alice).await {
        Frame::Connected {
            user_id, version, ..
        } => {
            assert_eq!(user_id.as_deref(), Some("alice"));
            assert_eq!(version, 1);
        }
        other => panic!("Expected Connected, got {:?}", other),
    }
    assert_eq!(next_roster(&mut alice).await, vec!["alice"]);
}

#[tokio::test]
async fn test_roster_follows_connects_and_disconnects() {
    let (addr, state) = start(Config::default()).await;

    let mut a = connect(addr, "userId=A").await;
    assert_eq!(next_roster(&mut a).await, vec!["A"]);

    let mut b = connect(addr, "userId=B").await;
    assert_eq!(next_roster(&mut a).await, vec!["A", "B"]);
    assert_eq!(next_roster(&mut b).await, vec!["A", "B"]);

    a.close(None).await.unwrap();
    assert_eq!(next_roster(&mut b).await, vec!["B"]);

    assert_eq!(state.presence.route(&UserId::new("A")), None);
    assert!(state.presence.route(&UserId::new("B")).is_some());
}

#[tokio::test]
async fn test_stale_duplicate_disconnect_keeps_newer_connection() {
    let (addr, state) = start(Config::default()).await;

    let mut first = connect(addr, "userId=U").await;
    assert_eq!(next_roster(&mut first).await, vec!["U"]);
    let first_conn = state.presence.route(&UserId::new("U")).unwrap();

    let mut second = connect(addr, "userId=U").await;
    assert_eq!(next_roster(&mut second).await, vec!["U"]);
    let second_conn = state.presence.route(&UserId::new("U")).unwrap();
    assert_ne!(first_conn, second_conn);

    first.close(None).await.unwrap();
    wait_until(|| state.presence.stats().connections == 1).await;
    assert_eq!(state.presence.route(&UserId::new("U")), Some(second_conn));

    second.close(None).await.unwrap();
    wait_until(|| state.presence.stats().connections == 0).await;
    assert_eq!(state.presence.route(&UserId::new("U")), None);
}

#[tokio::test]
async fn test_anonymous_client_sees_roster_but_is_not_routable() {
    let (addr, state) = start(Config::default()).await;
    let mut alice = connect(addr, "userId=alice").await;
    assert_eq!(next_roster(&mut alice).await, vec!["alice"]);

    let mut anon = connect(addr, "").await;
    match next_frame(&mut anon).await {
        Frame::Connected { user_id, .. } => assert_eq!(user_id, None),
        other => panic!("Expected Connected, got {:?}", other),
    }
    assert_eq!(next_roster(&mut anon).await, vec!["alice"]);
    assert_eq!(state.presence.roster().len(), 1);

    send(&mut anon, &Frame::send_with_ack(5, "alice", serde_json::json!("hi"))).await;
    match next_frame(&mut anon).await {
        Frame::Error { id, code, .. } => {
            assert_eq!(id, 5);
            assert_eq!(code, error_codes::UNAUTHENTICATED);
        }
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_pushes_to_online_recipient() {
    let (addr, _state) = start(Config::default()).await;
    let mut alice = connect(addr, "userId=alice").await;
    assert_eq!(next_roster(&mut alice).await, vec!["alice"]);
    let mut bob = connect(addr, "userId=bob").await;
    assert_eq!(next_roster(&mut bob).await, vec!["alice", "bob"]);
    assert_eq!(next_roster(&mut alice).await, vec!["alice", "bob"]);

    let payload = serde_json::json!({"text": "hello bob"});
    send(&mut alice, &Frame::send_with_ack(1, "bob", payload.clone())).await;

    assert_eq!(next_frame(&mut alice).await, Frame::ack(1));
    assert_eq!(
        next_frame(&mut bob).await,
        Frame::new_message(Some("alice".into()), payload)
    );
}

#[tokio::test]
async fn test_send_to_offline_recipient_is_acked_silently() {
    let (addr, _state) = start(Config::default()).await;
    let mut alice = connect(addr, "userId=alice").await;
    assert_eq!(next_roster(&mut alice).await, vec!["alice"]);

    send(&mut alice, &Frame::send_with_ack(9, "carol", serde_json::json!("later"))).await;
    assert_eq!(next_frame(&mut alice).await, Frame::ack(9));
}

#[tokio::test]
async fn test_invalid_frames_get_error_responses() {
    let (addr, _state) = start(Config::default()).await;
    let mut alice = connect(addr, "userId=alice").await;
    assert_eq!(next_roster(&mut alice).await, vec!["alice"]);

    alice.send(Message::Text("not json".into())).await.unwrap();
    match next_frame(&mut alice).await {
        Frame::Error { code, .. } => assert_eq!(code, error_codes::INVALID_FRAME),
        other => panic!("Expected Error, got {:?}", other),
    }

    send(&mut alice, &Frame::online_roster(vec![])).await;
    match next_frame(&mut alice).await {
        Frame::Error { code, .. } => assert_eq!(code, error_codes::UNEXPECTED_FRAME),
        other => panic!("Expected Error, got {:?}", other),
    }

    send(&mut alice, &Frame::Ping { timestamp: Some(3) }).await;
    assert_eq!(next_frame(&mut alice).await, Frame::pong(Some(3)));
}

#[tokio::test]
async fn test_msgpack_clients() {
    let (addr, _state) = start(Config::default()).await;
    let mut ws = connect(addr, "userId=native&format=msgpack").await;

    match ws.next().await.unwrap().unwrap() {
        Message::Binary(data) => assert!(matches!(
            codec::decode(&data).unwrap(),
            Frame::Connected { .. }
        )),
        other => panic!("Expected binary frame, got {:?}", other),
    }
    assert_eq!(next_roster(&mut ws).await, vec!["native"]);

    let ping = codec::encode(&Frame::ping()).unwrap();
    ws.send(Message::Binary(ping.to_vec())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await, Frame::pong(None));
}

#[tokio::test]
async fn test_oversized_binary_frame_closes_connection() {
    let mut config = Config::default();
    config.limits.max_message_size = 1024;
    let (addr, state) = start(config).await;
    let mut ws = connect(addr, "userId=native&format=msgpack").await;
    assert_eq!(next_roster(&mut ws).await, vec!["native"]);

    // Each message is under the limit, the declared frame is not.
    let mut chunk = (8 * 1024u32).to_be_bytes().to_vec();
    chunk.extend_from_slice(&[0u8; 512]);
    ws.send(Message::Binary(chunk)).await.unwrap();

    match next_frame(&mut ws).await {
        Frame::Error { code, .. } => assert_eq!(code, error_codes::INVALID_FRAME),
        other => panic!("Expected Error, got {:?}", other),
    }

    wait_until(|| !state.presence.is_online(&UserId::new("native"))).await;
    assert_eq!(state.presence.stats().connections, 0);

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_handshake_rejections() {
    let mut config = Config::default();
    config.limits.max_connections = 1;
    let (addr, _state) = start(config).await;

    assert!(connect_async(format!("ws://{addr}/ws?format=xml")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/ws?v=2")).await.is_err());

    let mut first = connect(addr, "userId=a&v=1.3").await;
    assert_eq!(next_roster(&mut first).await, vec!["a"]);
    assert!(connect_async(format!("ws://{addr}/ws?userId=b")).await.is_err());
}

#[tokio::test]
async fn test_connection_limit_holds_under_concurrent_upgrades() {
    let mut config = Config::default();
    config.limits.max_connections = 2;
    let (addr, state) = start(config).await;

    let attempts: Vec<_> = (0..8)
        .map(|i| tokio::spawn(connect_async(format!("ws://{addr}/ws?userId=u{i}"))))
        .collect();
    let mut accepted = Vec::new();
    for attempt in attempts {
        if let Ok((ws, _)) = attempt.await.unwrap() {
            accepted.push(ws);
        }
    }
    assert_eq!(accepted.len(), 2);
    assert!(state.slots_in_use() <= 2);

    // A closed connection frees its slot.
    let mut first = accepted.remove(0);
    first.close(None).await.unwrap();
    wait_until(|| state.slots_in_use() == 1).await;
    let mut again = connect(addr, "userId=late").await;
    assert!(matches!(
        next_frame(&mut again).await,
        Frame::Connected { .. }
    ));
}

#[tokio::test]
async fn test_custom_identity_param() {
    let mut config = Config::default();
    config.identity.query_param = "uid".into();
    let (addr, state) = start(config).await;

    let mut ws = connect(addr, "uid=zoe&userId=ignored").await;
    assert_eq!(next_roster(&mut ws).await, vec!["zoe"]);
    assert!(!state.presence.is_online(&UserId::new("ignored")));
    assert!(state.presence.route(&UserId::new("zoe")).is_some());
}
