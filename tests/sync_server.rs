use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mangahubd::core::{DomainEvent, EventPublisher, event_queue};
use mangahubd::sync::{SyncConfig, SyncServer};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

type Client = Framed<TcpStream, LinesCodec>;

async fn start_server(config: SyncConfig) -> (Arc<SyncServer>, EventPublisher) {
    let server = Arc::new(SyncServer::bind(config).await.unwrap());
    let (publisher, events) = event_queue(16);

    tokio::spawn(server.dispatcher().run(events, server.subscribe_shutdown()));
    let accept = server.clone();
    tokio::spawn(async move { accept.start().await });

    (server, publisher)
}

fn local() -> SyncConfig {
    SyncConfig::with_addr("127.0.0.1:0".parse().unwrap())
}

async fn connect(addr: SocketAddr, user_id: &str) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut client = Framed::new(stream, LinesCodec::new());
    client
        .send(format!(r#"{{"user_id":"{}"}}"#, user_id))
        .await
        .unwrap();

    let confirmation = next_frame(&mut client).await.expect("confirmation");
    assert_eq!(confirmation["status"], "connected");
    assert!(
        confirmation["client_id"]
            .as_str()
            .unwrap()
            .starts_with(&format!("{}_", user_id))
    );
    client
}

async fn next_frame(client: &mut Client) -> Option<Value> {
    let line = timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timeout waiting for frame")?
        .ok()?;
    Some(serde_json::from_str(&line).unwrap())
}

async fn wait_for_clients(server: &SyncServer, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while server.stats().await.total_clients != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry did not settle");
}

#[tokio::test]
async fn test_progress_reaches_account_endpoint() {
    let (server, publisher) = start_server(local()).await;
    let mut client = connect(server.local_addr(), "u1").await;

    publisher.publish(DomainEvent::progress("u1", "m1", 5)).unwrap();

    let frame = next_frame(&mut client).await.unwrap();
    assert_eq!(frame["type"], "progress_update");
    assert_eq!(frame["user_id"], "u1");
    assert_eq!(frame["manga_id"], "m1");
    assert_eq!(frame["chapter"], 5);
    assert!(frame["timestamp"].is_i64());

    // Exactly one frame for one event.
    assert!(
        timeout(Duration::from_millis(200), client.next())
            .await
            .is_err()
    );
    server.shutdown();
}

#[tokio::test]
async fn test_other_accounts_are_not_sent_progress() {
    let (server, publisher) = start_server(local()).await;
    let mut first = connect(server.local_addr(), "u1").await;
    let mut second = connect(server.local_addr(), "u1").await;
    let mut other = connect(server.local_addr(), "u2").await;

    let stats = server.stats().await;
    assert_eq!(stats.total_clients, 3);
    assert_eq!(stats.unique_users, 2);

    publisher.publish(DomainEvent::progress("u1", "m1", 7)).unwrap();

    assert_eq!(next_frame(&mut first).await.unwrap()["chapter"], 7);
    assert_eq!(next_frame(&mut second).await.unwrap()["chapter"], 7);
    assert!(
        timeout(Duration::from_millis(200), other.next())
            .await
            .is_err()
    );
    server.shutdown();
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let (server, _publisher) = start_server(local()).await;
    let mut client = connect(server.local_addr(), "u1").await;

    client.send(r#"{"type":"heartbeat"}"#).await.unwrap();
    let ack = next_frame(&mut client).await.unwrap();
    assert_eq!(ack["type"], "heartbeat_ack");
    assert!(ack["timestamp"].is_i64());

    // Unknown frame types are ignored, the session stays up.
    client.send(r#"{"type":"typing"}"#).await.unwrap();
    client.send(r#"{"type":"heartbeat"}"#).await.unwrap();
    assert_eq!(next_frame(&mut client).await.unwrap()["type"], "heartbeat_ack");
    server.shutdown();
}

#[tokio::test]
async fn test_malformed_handshake_closes_without_registering() {
    let (server, _publisher) = start_server(local()).await;

    for handshake in ["not json", r#"{"user_id":""}"#, r#"{"name":"u1"}"#] {
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut client = Framed::new(stream, LinesCodec::new());
        client.send(handshake).await.unwrap();

        assert!(next_frame(&mut client).await.is_none(), "{}", handshake);
    }

    assert_eq!(server.stats().await.total_clients, 0);
    server.shutdown();
}

#[tokio::test]
async fn test_handshake_timeout_closes_connection() {
    let (server, _publisher) = start_server(local().handshake_timeout(Duration::from_millis(100))).await;

    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut client = Framed::new(stream, LinesCodec::new());

    assert!(next_frame(&mut client).await.is_none());
    server.shutdown();
}

#[tokio::test]
async fn test_disconnect_removes_endpoint() {
    let (server, publisher) = start_server(local()).await;
    let client = connect(server.local_addr(), "u1").await;
    wait_for_clients(&server, 1).await;

    drop(client);
    wait_for_clients(&server, 0).await;

    // Delivery to nobody is fine.
    publisher.publish(DomainEvent::progress("u1", "m1", 1)).unwrap();
    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (server, _publisher) = start_server(local()).await;
    let mut client = connect(server.local_addr(), "u1").await;

    server.shutdown();

    assert!(next_frame(&mut client).await.is_none());
    wait_for_clients(&server, 0).await;
}

#[tokio::test]
async fn test_idle_session_is_disconnected() {
    let (server, _publisher) = start_server(local().idle_timeout(Duration::from_millis(200))).await;
    let mut quiet = connect(server.local_addr(), "u1").await;
    let mut chatty = connect(server.local_addr(), "u2").await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        chatty.send(r#"{"type":"heartbeat"}"#).await.unwrap();
        assert_eq!(next_frame(&mut chatty).await.unwrap()["type"], "heartbeat_ack");
    }

    assert!(next_frame(&mut quiet).await.is_none());
    wait_for_clients(&server, 1).await;
    server.shutdown();
}
