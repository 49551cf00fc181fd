//! Chat frames exchanged over the WebSocket.

use serde::{Deserialize, Serialize};

use crate::core::clock::clock_time;

/// Server to client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopicFrame {
    Chat {
        room: String,
        username: String,
        text: String,
        time: String,
    },
    System {
        text: String,
        time: String,
    },
    History {
        messages: Vec<TopicFrame>,
    },
}

impl TopicFrame {
    pub fn chat(room: impl Into<String>, username: impl Into<String>, text: impl Into<String>) -> Self {
        TopicFrame::Chat {
            room: room.into(),
            username: username.into(),
            text: text.into(),
            time: clock_time(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        TopicFrame::System {
            text: text.into(),
            time: clock_time(),
        }
    }
}

/// Client to server chat payload.
///
/// Only `text` is read. Identity fields a client adds (`username`, `room`,
/// `type`) are discarded; the hub stamps the member's join-time identity.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundChat {
    pub text: String,
}
