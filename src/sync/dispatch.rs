//! Bridge from the domain event queue to registered stream endpoints.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::endpoint::StreamRegistry;
use super::protocol::{ServerFrame, encode_line};
use crate::core::{DeliveryReport, DomainEvent, EventStream};

/// Renders domain events as `progress_update` frames and writes them to
/// every stream endpoint of the event's account.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<StreamRegistry>,
    write_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<StreamRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// Consume events until the queue closes or shutdown is signalled.
    pub async fn run(self, mut events: EventStream, mut shutdown: broadcast::Receiver<()>) {
        info!("Sync dispatcher started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.deliver(&event).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        info!("Sync dispatcher stopped");
    }

    /// One dispatch pass.
    ///
    /// Writes to the matching endpoints run concurrently, each bounded by the
    /// write timeout, so a stalled peer delays the pass by at most that
    /// timeout and never blocks the other endpoints. A failed write closes
    /// the endpoint; its session task performs the registry removal.
    pub async fn deliver(&self, event: &DomainEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let frame = match encode_line(&ServerFrame::from(event)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode progress update");
                return report;
            }
        };

        let targets = self
            .registry
            .snapshot_matching(|endpoint| endpoint.user_id == event.user_id && !endpoint.is_closed())
            .await;

        let writes = targets.iter().map(|(client_id, endpoint)| {
            let frame = &frame;
            async move {
                let result = endpoint.send(frame, self.write_timeout).await;
                if let Err(e) = &result {
                    warn!(client_id = %client_id, error = %e, "Failed to deliver progress update");
                }
                result.is_ok()
            }
        });

        for ok in join_all(writes).await {
            report.record(ok);
        }

        debug!(
            user_id = %event.user_id,
            manga_id = %event.manga_id,
            chapter = event.chapter,
            sent = report.sent,
            failed = report.failed,
            "Broadcasted progress update"
        );

        report
    }
}
