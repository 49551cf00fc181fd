use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::broadcast::Broadcaster;
use crate::chat::Hub;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::core::event_queue;
use crate::notify::NotifyServer;
use crate::rpc::RpcServer;
use crate::sync::SyncServer;
use crate::web::WebServer;

/// Brings up every listener and tears them down in order.
pub struct Orchestrator {
    config: Arc<AppConfig>,
}

/// Handle to a running stack.
pub struct Services {
    pub ctx: AppContext,
    web: Option<Arc<WebServer>>,
    rpc: Option<Arc<RpcServer>>,
    tasks: TaskTracker,
    grace: Duration,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run until Ctrl-C, then shut down.
    pub async fn start(&self) -> Result<()> {
        let services = self.launch().await?;
        info!("Server started");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");

        services.shutdown().await;
        Ok(())
    }

    /// Bind every listener and spawn its tasks.
    ///
    /// A listener that fails to bind is logged and left out; the others keep
    /// running. Fails only when nothing could be bound.
    pub async fn launch(&self) -> Result<Services> {
        let config = self.config.clone();
        let (publisher, events) = event_queue(config.event_queue_capacity);

        let sync = available(SyncServer::bind(config.sync_config()).await).map(Arc::new);
        let notify = available(NotifyServer::bind(config.notify_config()).await).map(Arc::new);
        let hub = Arc::new(Hub::new(config.chat_config()));

        let broadcaster = Broadcaster::new(publisher, notify.clone());
        let ctx = AppContext::new(config.clone(), broadcaster, sync.clone(), notify.clone(), hub);

        let web = available(WebServer::bind(ctx.clone(), config.http_bind).await).map(Arc::new);
        let rpc = available(RpcServer::bind(ctx.clone(), config.rpc_bind).await).map(Arc::new);

        if sync.is_none() && notify.is_none() && web.is_none() && rpc.is_none() {
            bail!("No listener could be started");
        }

        let tasks = TaskTracker::new();

        if let Some(sync) = &sync {
            tasks.spawn(sync.dispatcher().run(events, sync.subscribe_shutdown()));
            let server = sync.clone();
            spawn_service(&tasks, "sync", async move { server.start().await });
        }
        if let Some(notify) = &notify {
            let server = notify.clone();
            spawn_service(&tasks, "notify", async move { server.start().await });
        }
        if let Some(web) = &web {
            let server = web.clone();
            spawn_service(&tasks, "http", async move { server.start().await });
        }
        if let Some(rpc) = &rpc {
            let server = rpc.clone();
            spawn_service(&tasks, "rpc", async move { server.start().await });
        }

        Ok(Services {
            ctx,
            web,
            rpc,
            tasks,
            grace: config.shutdown_grace(),
        })
    }
}

impl Services {
    pub fn sync_addr(&self) -> Option<SocketAddr> {
        self.ctx.sync.as_ref().map(|s| s.local_addr())
    }

    pub fn notify_addr(&self) -> Option<SocketAddr> {
        self.ctx.notify.as_ref().map(|n| n.local_addr())
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.web.as_ref().map(|w| w.local_addr())
    }

    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc.as_ref().map(|r| r.local_addr())
    }

    /// Stop intake first, then close member and stream connections, and
    /// wait up to the grace period for every task to finish.
    pub async fn shutdown(self) {
        if let Some(rpc) = &self.rpc {
            rpc.shutdown();
        }
        if let Some(web) = &self.web {
            web.shutdown();
        }
        self.ctx.hub.close_all().await;
        if let Some(sync) = &self.ctx.sync {
            sync.shutdown();
        }
        if let Some(notify) = &self.ctx.notify {
            notify.shutdown();
        }

        self.tasks.close();
        if tokio::time::timeout(self.grace, self.tasks.wait()).await.is_err() {
            warn!(grace = ?self.grace, "Shutdown grace period elapsed with tasks still running");
        } else {
            info!("Shutdown complete");
        }
    }
}

fn available<T>(bound: Result<T, crate::error::ServerError>) -> Option<T> {
    match bound {
        Ok(server) => Some(server),
        Err(e) => {
            error!(error = %e, "Listener unavailable");
            None
        }
    }
}

fn spawn_service<F>(tasks: &TaskTracker, name: &'static str, service: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move {
        if let Err(e) = service.await {
            error!(service = name, error = %e, "Service stopped with error");
        }
    });
}
