//! Session sync listener.
//!
//! Long-lived TCP connections carrying newline-delimited JSON. Each client
//! authenticates with a `{"user_id": ...}` handshake, is registered under a
//! per-connection key, and then receives `progress_update` frames for its
//! account from the [`Dispatcher`].
//!
//! ## Architecture
//!
//! - `protocol`: wire frames
//! - `endpoint`: registered write halves and the registry type
//! - `session`: per-connection handshake and read loop
//! - `dispatch`: event queue consumer and fan-out

mod dispatch;
mod endpoint;
pub mod protocol;
mod session;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::core::Registry;
use crate::error::ServerError;

pub use dispatch::Dispatcher;
pub use endpoint::{StreamEndpoint, StreamRegistry};

/// Session sync listener configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub bind_addr: SocketAddr,
    /// The handshake frame must arrive within this time
    pub handshake_timeout: Duration,
    /// Disconnect after this long without any inbound frame
    pub idle_timeout: Duration,
    /// Deadline for one frame write
    pub write_timeout: Duration,
    /// Longest accepted inbound line
    pub max_frame_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            handshake_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            write_timeout: Duration::from_secs(5),
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl SyncConfig {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_clients: usize,
    pub unique_users: usize,
    /// Events waiting in the queue; filled in by whoever owns the publisher
    #[serde(default)]
    pub queued_events: usize,
}

/// Bound session sync listener.
pub struct SyncServer {
    config: SyncConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<StreamRegistry>,
    sessions: TaskTracker,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncServer {
    /// Bind the listening socket. Fails only this listener.
    pub async fn bind(config: SyncConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                transport: "sync",
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::LocalAddr {
            transport: "sync",
            source,
        })?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            local_addr,
            registry: Arc::new(Registry::new()),
            sessions: TaskTracker::new(),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dispatcher writing into this listener's registry.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone(), self.config.write_timeout)
    }

    /// Receiver that fires when `shutdown()` is called.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Accept connections until `shutdown()` is called, then wait for the
    /// session tasks to finish.
    pub async fn start(&self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, "Sync server listening");
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Sync connection accepted");
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        self.sessions.spawn(session::handle_connection(
                            stream,
                            peer,
                            self.registry.clone(),
                            self.config.clone(),
                            self.shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => error!(error = %e, "Failed to accept sync connection"),
                },
                _ = shutdown.recv() => {
                    info!("Sync server shutting down");
                    break;
                }
            }
        }

        self.sessions.close();
        self.sessions.wait().await;

        let leftover = self.registry.drain().await;
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Dropping sync endpoints left after shutdown");
        }
        Ok(())
    }

    /// Signal the accept loop, the dispatcher and every session to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn stats(&self) -> SyncStats {
        let endpoints = self.registry.snapshot_matching(|_| true).await;
        let users: HashSet<&str> = endpoints.iter().map(|(_, e)| e.user_id.as_str()).collect();
        SyncStats {
            total_clients: endpoints.len(),
            unique_users: users.len(),
            queued_events: 0,
        }
    }
}
