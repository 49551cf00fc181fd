//! Newline-delimited JSON frames of the session sync stream.

use serde::{Deserialize, Serialize};

use crate::core::DomainEvent;

/// First frame a client must send.
#[derive(Debug, Clone, Deserialize)]
pub struct Handshake {
    pub user_id: String,
}

/// Reply to a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub status: String,
    pub message: String,
    pub client_id: String,
}

impl Confirmation {
    pub fn connected(client_id: impl Into<String>) -> Self {
        Self {
            status: "connected".to_string(),
            message: "Successfully connected to sync server".to_string(),
            client_id: client_id.into(),
        }
    }
}

/// Frames sent by a registered client after the handshake.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Heartbeat,
    /// Any other `type`; accepted and ignored.
    #[serde(other)]
    Unknown,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    HeartbeatAck {
        timestamp: i64,
    },
    ProgressUpdate {
        user_id: String,
        manga_id: String,
        chapter: u32,
        timestamp: i64,
    },
}

impl From<&DomainEvent> for ServerFrame {
    fn from(event: &DomainEvent) -> Self {
        ServerFrame::ProgressUpdate {
            user_id: event.user_id.clone(),
            manga_id: event.manga_id.clone(),
            chapter: event.chapter,
            timestamp: event.timestamp,
        }
    }
}

/// Serialize a frame as one `\n`-terminated line.
pub fn encode_line<T: Serialize>(frame: &T) -> serde_json::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_and_unknown_frames() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Heartbeat);

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"resume","cursor":12}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);

        assert!(serde_json::from_str::<ClientFrame>(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn test_progress_frame_wire_shape() {
        let event = DomainEvent {
            user_id: "u1".into(),
            manga_id: "m1".into(),
            chapter: 5,
            timestamp: 1_700_000_000,
        };
        let line = encode_line(&ServerFrame::from(&event)).unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "progress_update");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["manga_id"], "m1");
        assert_eq!(value["chapter"], 5);
        assert_eq!(value["timestamp"], 1_700_000_000);
    }

    #[test]
    fn test_handshake_requires_user_id() {
        assert!(serde_json::from_str::<Handshake>(r#"{"user":"x"}"#).is_err());
        let handshake: Handshake = serde_json::from_str(r#"{"user_id":"u1"}"#).unwrap();
        assert_eq!(handshake.user_id, "u1");
    }
}
