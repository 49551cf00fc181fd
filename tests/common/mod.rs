#![allow(dead_code)]

use std::net::SocketAddr;

use mangahubd::config::AppConfig;
use mangahubd::core::{Orchestrator, Services};

pub fn any_port() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Every listener on an ephemeral loopback port.
pub fn test_config() -> AppConfig {
    AppConfig {
        sync_bind: any_port(),
        notify_bind: any_port(),
        http_bind: any_port(),
        rpc_bind: any_port(),
        shutdown_grace_secs: 2,
        ..Default::default()
    }
}

pub async fn launch(config: AppConfig) -> Services {
    Orchestrator::new(config).launch().await.unwrap()
}
