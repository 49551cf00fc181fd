use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::broadcast::Broadcaster;
use crate::chat::{Hub, HubStats};
use crate::config::AppConfig;
use crate::notify::{NotifyServer, NotifyStats};
use crate::sync::{SyncServer, SyncStats};

/// Shared handles passed to the HTTP and RPC surfaces.
///
/// Listener handles are `None` when that listener failed to bind; the rest
/// of the process keeps serving.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub broadcaster: Broadcaster,
    pub sync: Option<Arc<SyncServer>>,
    pub notify: Option<Arc<NotifyServer>>,
    pub hub: Arc<Hub>,
    started_at: Instant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStats {
    pub sync: Option<SyncStats>,
    pub notify: Option<NotifyStats>,
    pub chat: HubStats,
}

impl AppContext {
    pub fn new(
        config: Arc<AppConfig>,
        broadcaster: Broadcaster,
        sync: Option<Arc<SyncServer>>,
        notify: Option<Arc<NotifyServer>>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            config,
            broadcaster,
            sync,
            notify,
            hub,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn stats(&self) -> ServerStats {
        let sync = match &self.sync {
            Some(sync) => {
                let mut stats = sync.stats().await;
                stats.queued_events = self.broadcaster.queued();
                Some(stats)
            }
            None => None,
        };
        let notify = match &self.notify {
            Some(notify) => Some(notify.stats().await),
            None => None,
        };

        ServerStats {
            sync,
            notify,
            chat: self.hub.stats().await,
        }
    }
}
