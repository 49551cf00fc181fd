//! HTTP surface.
//!
//! ## Endpoints
//!
//! - `GET /ws?username=..&room=..` - WebSocket upgrade into a chat room
//! - `GET /health` - per-listener availability
//! - `GET /stats` - connection and room counts

mod websocket;

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use tracing::info;

use crate::context::{AppContext, ServerStats};
use crate::error::ServerError;

/// HTTP server for the chat WebSocket and the probes.
pub struct WebServer {
    ctx: AppContext,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub async fn bind(ctx: AppContext, bind_addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                transport: "http",
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::LocalAddr {
            transport: "http",
            source,
        })?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            ctx,
            listener: Mutex::new(Some(listener)),
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let Some(listener) = self.listener.lock().await.take() else {
            anyhow::bail!("Web server already started");
        };

        let app = Router::new()
            .route("/ws", get(websocket::ws_handler))
            .route("/health", get(health))
            .route("/stats", get(stats))
            .with_state(self.ctx.clone());

        info!(addr = %self.local_addr, "Web server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        info!("Web server stopped");
        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    services: Services,
}

#[derive(Debug, Serialize)]
struct Services {
    sync: &'static str,
    notify: &'static str,
    chat: &'static str,
}

fn availability(running: bool) -> &'static str {
    if running { "running" } else { "unavailable" }
}

async fn health(State(ctx): State<AppContext>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        services: Services {
            sync: availability(ctx.sync.is_some()),
            notify: availability(ctx.notify.is_some()),
            chat: availability(true),
        },
    })
}

async fn stats(State(ctx): State<AppContext>) -> Json<ServerStats> {
    Json(ctx.stats().await)
}
