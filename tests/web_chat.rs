mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn join(addr: SocketAddr, username: &str, room: &str) -> Socket {
    let url = format!("ws://{}/ws?username={}&room={}", addr, username, room);
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Next JSON text frame, skipping control frames.
async fn next_json(socket: &mut Socket) -> Option<Value> {
    loop {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timeout waiting for frame")?
            .ok()?;
        match message {
            Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Read frames until one has the given `text`.
async fn wait_for_text(socket: &mut Socket, text: &str) -> Value {
    loop {
        let frame = next_json(socket).await.expect("socket closed");
        if frame["text"] == text {
            return frame;
        }
    }
}

async fn send_chat(socket: &mut Socket, payload: &str) {
    socket.send(Message::Text(payload.into())).await.unwrap();
}

#[tokio::test]
async fn test_chat_uses_join_time_username() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;
    let mut bob = join(addr, "bob", "general").await;
    wait_for_text(&mut bob, "bob joined the room").await;

    send_chat(&mut alice, r#"{"text":"hi","username":"mallory","room":"admin"}"#).await;

    let frame = wait_for_text(&mut bob, "hi").await;
    assert_eq!(frame["type"], "chat");
    assert_eq!(frame["username"], "alice");
    assert_eq!(frame["room"], "general");

    // The author gets its own message too.
    assert_eq!(wait_for_text(&mut alice, "hi").await["username"], "alice");

    services.shutdown().await;
}

#[tokio::test]
async fn test_late_joiner_receives_history_first() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;
    send_chat(&mut alice, r#"{"text":"first"}"#).await;
    wait_for_text(&mut alice, "first").await;

    let mut carol = join(addr, "carol", "general").await;
    let history = next_json(&mut carol).await.unwrap();
    assert_eq!(history["type"], "history");
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.last().unwrap()["text"], "first");

    assert_eq!(next_json(&mut carol).await.unwrap()["text"], "carol joined the room");
    services.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;

    send_chat(&mut alice, "not json").await;
    send_chat(&mut alice, r#"{"message":"wrong field"}"#).await;
    send_chat(&mut alice, r#"{"text":"still here"}"#).await;

    let frame = next_json(&mut alice).await.unwrap();
    assert_eq!(frame["text"], "still here");
    services.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_announces_leave_and_deletes_empty_room() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();
    let hub = services.ctx.hub.clone();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;
    let mut bob = join(addr, "bob", "general").await;
    wait_for_text(&mut bob, "bob joined the room").await;

    bob.close(None).await.unwrap();
    wait_for_text(&mut alice, "bob left the room").await;
    assert_eq!(hub.member_count("general").await, 1);

    alice.close(None).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while hub.room_exists("general").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room was not deleted");

    services.shutdown().await;
}

#[tokio::test]
async fn test_missing_join_params_is_bad_request() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();
    let http = reqwest::Client::new();

    for query in ["username=alice", "room=general", "username=&room=general", ""] {
        let resp = http
            .get(format!("http://{}/ws?{}", addr, query))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST, "{}", query);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "username and room required");
    }

    services.shutdown().await;
}

#[tokio::test]
async fn test_health_and_stats() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();
    let http = reqwest::Client::new();

    let health: Value = http
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["services"]["sync"], "running");
    assert_eq!(health["services"]["notify"], "running");

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;

    let stats: Value = http
        .get(format!("http://{}/stats", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["chat"]["total_clients"], 1);
    assert_eq!(stats["chat"]["total_rooms"], 1);
    assert_eq!(stats["chat"]["rooms"][0]["name"], "general");
    assert_eq!(stats["sync"]["total_clients"], 0);
    assert_eq!(stats["notify"]["total_clients"], 0);

    services.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_members() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;

    services.shutdown().await;
    assert!(next_json(&mut alice).await.is_none());
}

async fn wait_for_room_gone(services: &mangahubd::core::Services, room: &str) {
    let hub = services.ctx.hub.clone();
    timeout(Duration::from_secs(3), async {
        while hub.room_exists(room).await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("room was not deleted");
}

#[tokio::test]
async fn test_oversized_frame_disconnects_member() {
    let services = common::launch(common::test_config()).await;
    let addr = services.http_addr().unwrap();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;

    let text = "x".repeat(1024);
    send_chat(&mut alice, &format!(r#"{{"text":"{}"}}"#, text)).await;

    assert!(next_json(&mut alice).await.is_none());
    wait_for_room_gone(&services, "general").await;
    services.shutdown().await;
}

#[tokio::test]
async fn test_silent_member_hits_read_deadline() {
    let mut config = common::test_config();
    config.chat.pong_wait_secs = 1;
    let services = common::launch(config).await;
    let addr = services.http_addr().unwrap();

    let mut alice = join(addr, "alice", "general").await;
    wait_for_text(&mut alice, "alice joined the room").await;

    // Not polling the socket means the server's pings go unanswered.
    wait_for_room_gone(&services, "general").await;
    assert!(next_json(&mut alice).await.is_none());
    services.shutdown().await;
}
