//! Notification listener.
//!
//! Connectionless UDP channel. Clients register their address with a
//! `register` datagram, keep it alive with `ping`, and receive notification
//! datagrams pushed by the server. Addresses silent for longer than the
//! liveness window are swept.
//!
//! Every inbound datagram is handled in its own task; datagrams share no
//! state besides the registry.

mod endpoint;
mod handler;
pub mod protocol;
mod sweep;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::core::{DeliveryReport, Registry};
use crate::error::ServerError;
use crate::logging::LogThrottle;

pub use endpoint::{DatagramEndpoint, DatagramRegistry};
pub use protocol::{CHAPTER_RELEASES, Notification, NotificationKind, Preferences, SYSTEM_UPDATES};
pub use sweep::sweep_inactive;

/// Notification listener configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub bind_addr: SocketAddr,
    /// How often silent endpoints are swept
    pub sweep_interval: Duration,
    /// Maximum silence before an endpoint is considered dead
    pub liveness_window: Duration,
    /// Receive buffer; longer datagrams are truncated by the OS
    pub recv_buffer: usize,
    pub send_timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        let sweep_interval = Duration::from_secs(60);
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9091)),
            sweep_interval,
            liveness_window: sweep_interval * 5,
            recv_buffer: 2048,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl NotifyConfig {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    pub fn sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = every;
        self
    }

    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn recv_buffer(mut self, bytes: usize) -> Self {
        self.recv_buffer = bytes.max(64);
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyStats {
    pub total_clients: usize,
    pub unique_users: usize,
}

/// Bound notification listener.
pub struct NotifyServer {
    config: NotifyConfig,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    registry: Arc<DatagramRegistry>,
    handlers: TaskTracker,
    junk_log: Arc<LogThrottle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NotifyServer {
    pub async fn bind(config: NotifyConfig) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                transport: "notify",
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| ServerError::LocalAddr {
            transport: "notify",
            source,
        })?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            local_addr,
            registry: Arc::new(Registry::new()),
            handlers: TaskTracker::new(),
            junk_log: Arc::new(LogThrottle::new(Duration::from_secs(10))),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive datagrams until `shutdown()` is called. Also drives the
    /// liveness sweeper.
    pub async fn start(&self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, "Notification server listening");

        let sweeper = tokio::spawn(sweep::run(
            self.registry.clone(),
            self.config.sweep_interval,
            self.config.liveness_window,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut buf = vec![0u8; self.config.recv_buffer];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => {
                        let data = buf[..len].to_vec();
                        let socket = self.socket.clone();
                        let registry = self.registry.clone();
                        let junk_log = self.junk_log.clone();
                        let send_timeout = self.config.send_timeout;
                        self.handlers.spawn(async move {
                            handler::handle_datagram(&socket, &registry, &data, addr, send_timeout, &junk_log).await;
                        });
                    }
                    // ICMP port-unreachable from a previous send surfaces here
                    // on some platforms; it is not fatal for the listener.
                    Err(e) => debug!(error = %e, "Error reading datagram"),
                },
                _ = shutdown.recv() => {
                    info!("Notification server shutting down");
                    break;
                }
            }
        }

        self.handlers.close();
        self.handlers.wait().await;
        if let Err(e) = sweeper.await {
            error!(error = %e, "Notification sweeper task failed");
        }
        self.registry.drain().await;
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Unicast to every address registered for `user_id`.
    pub async fn send_to_account(&self, user_id: &str, notification: &Notification) -> DeliveryReport {
        let targets = self
            .registry
            .snapshot_matching(|endpoint| endpoint.user_id == user_id)
            .await;
        let report = self.deliver(&targets, notification).await;

        debug!(
            user_id = %user_id,
            kind = ?notification.kind,
            sent = report.sent,
            failed = report.failed,
            "Sent notification to account"
        );
        report
    }

    /// Send to every registered address whose `preference` flag is not
    /// explicitly disabled.
    pub async fn send_broadcast(&self, notification: &Notification, preference: &str) -> DeliveryReport {
        let targets = self
            .registry
            .snapshot_matching(|endpoint| endpoint.preferences.allows(preference))
            .await;
        let report = self.deliver(&targets, notification).await;

        info!(
            kind = ?notification.kind,
            preference = %preference,
            sent = report.sent,
            failed = report.failed,
            "Broadcast notification"
        );
        report
    }

    /// Announce a new chapter to everyone who has not opted out.
    pub async fn send_chapter_release(&self, manga_id: &str, manga_title: &str, chapter: u32) -> DeliveryReport {
        let notification = Notification::chapter_release(manga_id, manga_title, chapter);
        self.send_broadcast(&notification, CHAPTER_RELEASES).await
    }

    async fn deliver(
        &self,
        targets: &[(SocketAddr, DatagramEndpoint)],
        notification: &Notification,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let bytes = match serde_json::to_vec(notification) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode notification");
                return report;
            }
        };

        for (addr, _) in targets {
            let result =
                handler::send_datagram(&self.socket, *addr, &bytes, self.config.send_timeout).await;
            if let Err(e) = &result {
                warn!(addr = %addr, error = %e, "Failed to send notification");
            }
            report.record(result.is_ok());
        }
        report
    }

    pub async fn stats(&self) -> NotifyStats {
        let endpoints = self.registry.snapshot_matching(|_| true).await;
        let users: HashSet<&str> = endpoints.iter().map(|(_, e)| e.user_id.as_str()).collect();
        NotifyStats {
            total_clients: endpoints.len(),
            unique_users: users.len(),
        }
    }
}
