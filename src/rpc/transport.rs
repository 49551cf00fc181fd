//! TCP transport for the control RPC.
//!
//! Newline-delimited JSON, one request per line. Each connection is handled
//! in its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::methods::MethodHandler;
use super::protocol::{Request, Response};
use crate::error::ServerError;

/// Longest accepted request line.
const MAX_LINE: usize = 64 * 1024;

pub struct Transport {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<MethodHandler>,
    connections: TaskTracker,
}

impl Transport {
    pub async fn bind(bind_addr: SocketAddr, handler: MethodHandler) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                transport: "rpc",
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::LocalAddr {
            transport: "rpc",
            source,
        })?;

        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(handler),
            connections: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the shutdown signal is received.
    pub async fn listen(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr, "RPC server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "RPC client connected");
                        let handler = self.handler.clone();
                        let shutdown = shutdown.resubscribe();
                        self.connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, handler, shutdown).await {
                                debug!(peer = %peer, error = %e, "RPC connection error");
                            }
                            debug!(peer = %peer, "RPC client disconnected");
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept RPC connection"),
                },
                _ = shutdown.recv() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        self.connections.close();
        self.connections.wait().await;
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<MethodHandler>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE));

    loop {
        let line = tokio::select! {
            line = framed.next() => match line {
                Some(line) => line?,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => {
                if let Err(msg) = request.validate() {
                    warn!(peer = %peer, error = msg, "Invalid RPC request");
                    Response::invalid_request(request.id.clone().unwrap_or_default())
                } else if request.is_notification() {
                    debug!(peer = %peer, method = %request.method, "RPC notification received");
                    handler.handle(request).await;
                    continue;
                } else {
                    handler.handle(request).await
                }
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "RPC parse error");
                Response::parse_error()
            }
        };

        framed.send(serde_json::to_string(&response)?).await?;
    }

    Ok(())
}
