//! Daemon configuration.
//!
//! Layered with figment: built-in defaults, then the TOML file, then
//! `MANGAHUBD_*` environment variables, then command line overrides.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::chat::ChatConfig;
use crate::notify::NotifyConfig;
use crate::sync::SyncConfig;

pub const DEFAULT_CONFIG_FILE: &str = "mangahubd.toml";
pub const ENV_PREFIX: &str = "MANGAHUBD_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync_bind: SocketAddr,
    pub notify_bind: SocketAddr,
    pub http_bind: SocketAddr,
    pub rpc_bind: SocketAddr,
    pub event_queue_capacity: usize,
    pub shutdown_grace_secs: u64,
    pub verbose: bool,
    pub json_logs: bool,
    pub sync: SyncSection,
    pub notify: NotifySection,
    pub chat: ChatSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub handshake_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub sweep_interval_secs: u64,
    pub liveness_window_secs: u64,
    pub recv_buffer_bytes: usize,
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub history_limit: usize,
    pub outbound_capacity: usize,
    pub pong_wait_secs: u64,
    pub write_wait_secs: u64,
    pub max_message_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync_bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
            notify_bind: SocketAddr::from(([0, 0, 0, 0], 9091)),
            http_bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 9092)),
            event_queue_capacity: 100,
            shutdown_grace_secs: 5,
            verbose: false,
            json_logs: false,
            sync: SyncSection::default(),
            notify: NotifySection::default(),
            chat: ChatSection::default(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 30,
            idle_timeout_secs: 300,
            write_timeout_secs: 5,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            liveness_window_secs: 300,
            recv_buffer_bytes: 2048,
            send_timeout_secs: 5,
        }
    }
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            history_limit: 100,
            outbound_capacity: 256,
            pong_wait_secs: 60,
            write_wait_secs: 10,
            max_message_bytes: 512,
        }
    }
}

impl AppConfig {
    /// Load the configuration.
    ///
    /// `overrides` is any serializable value whose fields mirror top-level
    /// keys; unset `Option` fields should be skipped during serialization so
    /// they do not clobber lower layers.
    pub fn load<T: Serialize>(path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        Self::figment(path, overrides)
            .extract()
            .context("Failed to load configuration")
    }

    pub fn figment<T: Serialize>(path: Option<&Path>, overrides: Option<&T>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::with_addr(self.sync_bind)
            .handshake_timeout(Duration::from_secs(self.sync.handshake_timeout_secs))
            .idle_timeout(Duration::from_secs(self.sync.idle_timeout_secs))
            .write_timeout(Duration::from_secs(self.sync.write_timeout_secs))
            .max_frame_bytes(self.sync.max_frame_bytes)
    }

    pub fn notify_config(&self) -> NotifyConfig {
        NotifyConfig::with_addr(self.notify_bind)
            .sweep_interval(Duration::from_secs(self.notify.sweep_interval_secs))
            .liveness_window(Duration::from_secs(self.notify.liveness_window_secs))
            .recv_buffer(self.notify.recv_buffer_bytes)
            .send_timeout(Duration::from_secs(self.notify.send_timeout_secs))
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig::default()
            .history_limit(self.chat.history_limit)
            .outbound_capacity(self.chat.outbound_capacity)
            .pong_wait(Duration::from_secs(self.chat.pong_wait_secs))
            .write_wait(Duration::from_secs(self.chat.write_wait_secs))
            .max_message_bytes(self.chat.max_message_bytes)
    }
}
