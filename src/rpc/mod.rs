//! Local control interface.
//!
//! JSON-RPC 2.0 over TCP for operators and the business layer: publish
//! progress changes, announce chapters, and read status and stats.
//!
//! ## Architecture
//!
//! - `protocol`: JSON-RPC 2.0 request/response types
//! - `transport`: TCP listener with newline-delimited JSON framing
//! - `methods`: method dispatcher and handlers
//! - `client`: client used by the CLI subcommands
//!
//! ## Methods
//!
//! | Method | Params |
//! |---|---|
//! | `server.status` | none |
//! | `server.stats` | none |
//! | `progress.update` | `user_id`, `manga_id`, `chapter` |
//! | `notify.chapter` | `manga_id`, `manga_title`, `chapter` |
//! | `notify.user` | `user_id`, `manga_id`, `message` |
//! | `chat.rooms` | none |

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::context::AppContext;
use crate::error::ServerError;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::{MethodHandler, ServerStatus};
pub use protocol::{Request, Response, RpcError};

pub struct RpcServer {
    transport: Transport,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    pub async fn bind(ctx: AppContext, bind_addr: SocketAddr) -> Result<Self, ServerError> {
        let transport = Transport::bind(bind_addr, MethodHandler::new(ctx)).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            transport,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Serve until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.transport.listen(shutdown_rx).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
