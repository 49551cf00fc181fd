//! Datagram payloads. One JSON object per datagram.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::clock::unix_timestamp;

/// Preference flag gating chapter release broadcasts.
pub const CHAPTER_RELEASES: &str = "chapter_releases";
/// Preference flag gating system announcements.
pub const SYSTEM_UPDATES: &str = "system_updates";

/// Per-endpoint delivery preferences. Unset flags count as enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences(BTreeMap<String, bool>);

impl Preferences {
    /// Client-supplied flags with every known flag the client left out
    /// filled in as enabled.
    pub fn with_defaults(flags: Option<BTreeMap<String, bool>>) -> Self {
        let mut flags = flags.unwrap_or_default();
        for known in [CHAPTER_RELEASES, SYSTEM_UPDATES] {
            flags.entry(known.to_string()).or_insert(true);
        }
        Self(flags)
    }

    pub fn allows(&self, flag: &str) -> bool {
        self.0.get(flag).copied().unwrap_or(true)
    }
}

/// Client to server control messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Register {
        user_id: String,
        #[serde(default)]
        preferences: Option<BTreeMap<String, bool>>,
    },
    Unregister {
        #[serde(default)]
        user_id: Option<String>,
    },
    Ping,
}

/// Replies to `register` and `unregister`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlReply {
    Registered {
        message: String,
        preferences: Preferences,
        timestamp: i64,
    },
    Unregistered {
        message: String,
    },
}

/// Reply to `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "pong")]
pub struct Pong {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ChapterRelease,
    LibraryUpdate,
    ProgressUpdate,
}

/// Server-initiated notification datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub manga_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    pub timestamp: i64,
}

impl Notification {
    pub fn chapter_release(manga_id: impl Into<String>, manga_title: impl Into<String>, chapter: u32) -> Self {
        let manga_title = manga_title.into();
        Self {
            kind: NotificationKind::ChapterRelease,
            title: "New Chapter Released".to_string(),
            message: format!("{} - Chapter {} is now available", manga_title, chapter),
            manga_id: manga_id.into(),
            manga_title: Some(manga_title),
            chapter: Some(chapter),
            timestamp: unix_timestamp(),
        }
    }

    pub fn progress_update(manga_id: impl Into<String>, chapter: u32) -> Self {
        Self {
            kind: NotificationKind::ProgressUpdate,
            title: "Reading Progress Updated".to_string(),
            message: format!("Updated progress to chapter {}", chapter),
            manga_id: manga_id.into(),
            manga_title: None,
            chapter: Some(chapter),
            timestamp: unix_timestamp(),
        }
    }

    pub fn library_update(manga_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::LibraryUpdate,
            title: "Library Updated".to_string(),
            message: message.into(),
            manga_id: manga_id.into(),
            manga_title: None,
            chapter: None,
            timestamp: unix_timestamp(),
        }
    }
}
