//! Domain events and the bounded queue that carries them to the dispatcher.
//!
//! Producers never wait on the queue: `EventPublisher::publish` uses
//! `try_send` and drops the event when the queue is full. Only the consumer
//! side blocks.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::clock::unix_timestamp;
use crate::error::PublishError;
use crate::logging::LogThrottle;

/// Transport-agnostic reading progress change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub user_id: String,
    pub manga_id: String,
    pub chapter: u32,
    pub timestamp: i64,
}

impl DomainEvent {
    /// Progress event stamped with the current time.
    pub fn progress(user_id: impl Into<String>, manga_id: impl Into<String>, chapter: u32) -> Self {
        Self {
            user_id: user_id.into(),
            manga_id: manga_id.into(),
            chapter,
            timestamp: unix_timestamp(),
        }
    }
}

/// Create a bounded event queue.
pub fn event_queue(capacity: usize) -> (EventPublisher, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventPublisher {
            tx,
            overflow_log: Arc::new(LogThrottle::new(Duration::from_secs(5))),
        },
        EventStream { rx },
    )
}

/// Producer half. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<DomainEvent>,
    overflow_log: Arc<LogThrottle>,
}

impl EventPublisher {
    pub fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                if let Some(suppressed) = self.overflow_log.check() {
                    tracing::warn!(
                        user_id = %event.user_id,
                        manga_id = %event.manga_id,
                        suppressed,
                        "Event queue full, dropping event"
                    );
                }
                Err(PublishError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(user_id = %event.user_id, "Event queue closed, dropping event");
                Err(PublishError::Closed)
            }
        }
    }

    /// Number of events waiting for the dispatcher.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the dispatcher.
pub struct EventStream {
    rx: mpsc::Receiver<DomainEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_receive() {
        let (publisher, mut stream) = event_queue(4);

        publisher
            .publish(DomainEvent::progress("u1", "m1", 5))
            .unwrap();
        assert_eq!(publisher.queued(), 1);

        let event = stream.recv().await.unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.chapter, 5);
        assert_eq!(publisher.queued(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (publisher, mut stream) = event_queue(2);

        assert!(publisher.publish(DomainEvent::progress("u1", "m1", 1)).is_ok());
        assert!(publisher.publish(DomainEvent::progress("u1", "m1", 2)).is_ok());
        assert_eq!(
            publisher.publish(DomainEvent::progress("u1", "m1", 3)),
            Err(PublishError::QueueFull)
        );

        assert_eq!(stream.recv().await.unwrap().chapter, 1);
        assert_eq!(stream.recv().await.unwrap().chapter, 2);
    }

    #[tokio::test]
    async fn test_publish_after_consumer_dropped() {
        let (publisher, stream) = event_queue(2);
        drop(stream);

        assert!(publisher.is_closed());
        assert_eq!(
            publisher.publish(DomainEvent::progress("u1", "m1", 1)),
            Err(PublishError::Closed)
        );
    }
}
