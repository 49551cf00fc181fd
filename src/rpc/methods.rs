//! RPC method handlers.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AppContext;
use crate::notify::Notification;

use super::protocol::{Request, Response};

pub struct MethodHandler {
    ctx: AppContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub version: String,
    pub uptime_secs: u64,
    /// Bound address, or `None` if the listener failed to start
    pub sync: Option<SocketAddr>,
    pub notify: Option<SocketAddr>,
    pub http_bind: SocketAddr,
    pub rpc_bind: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct ProgressParams {
    user_id: String,
    manga_id: String,
    chapter: u32,
}

#[derive(Debug, Deserialize)]
struct ChapterParams {
    manga_id: String,
    manga_title: String,
    chapter: u32,
}

#[derive(Debug, Deserialize)]
struct LibraryParams {
    manga_id: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct UserParams {
    user_id: String,
    manga_id: String,
    message: String,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "server.status" => self.server_status(id),
            "server.stats" => Response::success(id, self.ctx.stats().await),
            "progress.update" => self.progress_update(id, params).await,
            "notify.chapter" => self.notify_chapter(id, params).await,
            "notify.user" => self.notify_user(id, params).await,
            "notify.library" => self.notify_library(id, params).await,
            "chat.rooms" => Response::success(id, self.ctx.hub.stats().await),
            _ => Response::method_not_found(id, &request.method),
        }
    }

    fn server_status(&self, id: Value) -> Response {
        Response::success(
            id,
            ServerStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.ctx.uptime_secs(),
                sync: self.ctx.sync.as_ref().map(|s| s.local_addr()),
                notify: self.ctx.notify.as_ref().map(|n| n.local_addr()),
                http_bind: self.ctx.config.http_bind,
                rpc_bind: self.ctx.config.rpc_bind,
            },
        )
    }

    /// Record a progress change: queue it for stream sync and notify the
    /// account's datagram endpoints.
    async fn progress_update(&self, id: Value, params: Value) -> Response {
        let params: ProgressParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };
        if params.user_id.is_empty() || params.manga_id.is_empty() {
            return Response::invalid_params(id, "user_id and manga_id are required");
        }

        let receipt = self
            .ctx
            .broadcaster
            .progress_updated(&params.user_id, &params.manga_id, params.chapter)
            .await;
        Response::success(id, receipt)
    }

    async fn notify_chapter(&self, id: Value, params: Value) -> Response {
        let params: ChapterParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };
        if self.ctx.notify.is_none() {
            return Response::unavailable(id, "notify");
        }

        let report = self
            .ctx
            .broadcaster
            .announce_chapter(&params.manga_id, &params.manga_title, params.chapter)
            .await;
        Response::success(id, report)
    }

    async fn notify_user(&self, id: Value, params: Value) -> Response {
        let params: UserParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };
        if self.ctx.notify.is_none() {
            return Response::unavailable(id, "notify");
        }

        let notification = Notification::library_update(params.manga_id, params.message);
        let report = self
            .ctx
            .broadcaster
            .notify_account(&params.user_id, &notification)
            .await;
        Response::success(id, report)
    }

    /// Catalog change sent to every endpoint that keeps system updates on.
    async fn notify_library(&self, id: Value, params: Value) -> Response {
        let params: LibraryParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };
        if self.ctx.notify.is_none() {
            return Response::unavailable(id, "notify");
        }

        let report = self
            .ctx
            .broadcaster
            .library_updated(&params.manga_id, &params.message)
            .await;
        Response::success(id, report)
    }
}

fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| e.to_string())
}
