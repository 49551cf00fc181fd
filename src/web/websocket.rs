//! WebSocket glue between a browser socket and the chat hub.
//!
//! Each socket runs two tasks. The reader posts inbound chat text and holds
//! the read deadline; the writer drains the member's outbound queue and sends
//! a ping every `ping_period` so a live peer keeps the deadline fresh.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, info};

use crate::chat::protocol::InboundChat;
use crate::chat::{ChatConfig, Hub, MemberHandle, Membership};
use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    room: Option<String>,
}

impl JoinParams {
    fn validate(self) -> Option<(String, String)> {
        match (self.username, self.room) {
            (Some(username), Some(room)) if !username.is_empty() && !room.is_empty() => {
                Some((username, room))
            }
            _ => None,
        }
    }
}

/// Validate join parameters, then upgrade.
pub async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<JoinParams>,
    State(ctx): State<AppContext>,
) -> Response {
    let Some((username, room)) = params.validate() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "username and room required" })),
        )
            .into_response();
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = ctx.hub.clone();
    upgrade
        .max_message_size(hub.config().max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, hub, username, room))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<Hub>, username: String, room: String) {
    let config = hub.config().clone();
    let Some(Membership { member, outbound }) = hub.join(&room, &username).await else {
        debug!(room = %room, username = %username, "Chat is closed, refusing member");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    debug!(room = %room, username = %username, "WebSocket member connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound, config.clone()));
    let mut reader = tokio::spawn(read_loop(stream, hub.clone(), member.clone(), config.pong_wait));

    tokio::select! {
        _ = &mut reader => {
            // Leaving closes the queue; the writer flushes it and sends Close.
            hub.leave(&member).await;
            let _ = writer.await;
        }
        _ = &mut writer => {
            reader.abort();
            hub.leave(&member).await;
        }
    }

    info!(room = %member.room, username = %member.username, "WebSocket member disconnected");
}

async fn read_loop(mut stream: SplitStream<WebSocket>, hub: Arc<Hub>, member: MemberHandle, pong_wait: Duration) {
    loop {
        let message = match timeout(pong_wait, stream.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!(username = %member.username, error = %e, "WebSocket receive error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!(username = %member.username, "WebSocket read deadline expired");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<InboundChat>(text.as_str()) {
                Ok(chat) => {
                    if hub.post(&member, chat.text).await.is_none() {
                        // Evicted or room gone
                        break;
                    }
                }
                Err(e) => debug!(username = %member.username, error = %e, "Ignoring malformed chat frame"),
            },
            Message::Close(_) => break,
            // Pongs, pings and binary frames only refresh the deadline
            _ => {}
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    config: ChatConfig,
) {
    let period = config.ping_period().max(Duration::from_millis(1));
    let mut ping = interval_at(Instant::now() + period, period);

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(json) => Message::Text(json.as_ref().into()),
                None => {
                    let _ = timeout(config.write_wait, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(config.write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
            Err(_) => {
                debug!("WebSocket write deadline expired");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(username: Option<&str>, room: Option<&str>) -> JoinParams {
        JoinParams {
            username: username.map(String::from),
            room: room.map(String::from),
        }
    }

    #[test]
    fn test_join_params_require_both_fields() {
        assert_eq!(
            params(Some("alice"), Some("general")).validate(),
            Some(("alice".to_string(), "general".to_string()))
        );
        assert!(params(None, Some("general")).validate().is_none());
        assert!(params(Some("alice"), None).validate().is_none());
        assert!(params(Some(""), Some("general")).validate().is_none());
        assert!(params(Some("alice"), Some("")).validate().is_none());
    }
}
