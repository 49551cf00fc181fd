//! Entry points for callers that change domain state.
//!
//! Reading progress goes out on two transports: the domain event is queued
//! for the sync dispatcher and a `progress_update` notification is unicast to
//! the account's datagram endpoints. Catalog announcements only use the
//! notification channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{DeliveryReport, DomainEvent, EventPublisher};
use crate::notify::{Notification, NotifyServer, SYSTEM_UPDATES};

/// Outcome of [`Broadcaster::progress_updated`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReceipt {
    /// The domain event made it into the queue
    pub queued: bool,
    /// Datagram unicast to the account's endpoints
    pub notified: DeliveryReport,
}

#[derive(Clone)]
pub struct Broadcaster {
    events: EventPublisher,
    notify: Option<Arc<NotifyServer>>,
}

impl Broadcaster {
    /// `notify` is `None` when the notification listener failed to start; the
    /// datagram legs then report nothing sent.
    pub fn new(events: EventPublisher, notify: Option<Arc<NotifyServer>>) -> Self {
        Self { events, notify }
    }

    /// Events currently waiting for the dispatcher.
    pub fn queued(&self) -> usize {
        self.events.queued()
    }

    /// Record a reading progress change.
    ///
    /// Never blocks on the event queue. A full queue drops the event; the
    /// notification leg still runs.
    pub async fn progress_updated(&self, user_id: &str, manga_id: &str, chapter: u32) -> ProgressReceipt {
        let queued = self
            .events
            .publish(DomainEvent::progress(user_id, manga_id, chapter))
            .is_ok();

        let notified = self
            .notify_account(user_id, &Notification::progress_update(manga_id, chapter))
            .await;

        debug!(
            user_id = %user_id,
            manga_id = %manga_id,
            chapter,
            queued,
            notified = notified.sent,
            "Progress update fanned out"
        );
        ProgressReceipt { queued, notified }
    }

    pub async fn notify_account(&self, user_id: &str, notification: &Notification) -> DeliveryReport {
        match &self.notify {
            Some(notify) => notify.send_to_account(user_id, notification).await,
            None => DeliveryReport::default(),
        }
    }

    /// Tell every endpoint that has not opted out of chapter releases.
    pub async fn announce_chapter(&self, manga_id: &str, manga_title: &str, chapter: u32) -> DeliveryReport {
        match &self.notify {
            Some(notify) => notify.send_chapter_release(manga_id, manga_title, chapter).await,
            None => DeliveryReport::default(),
        }
    }

    pub async fn library_updated(&self, manga_id: &str, message: &str) -> DeliveryReport {
        match &self.notify {
            Some(notify) => {
                notify
                    .send_broadcast(&Notification::library_update(manga_id, message), SYSTEM_UPDATES)
                    .await
            }
            None => DeliveryReport::default(),
        }
    }
}
