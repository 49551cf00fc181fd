//! Error types shared by the listeners.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Listener-level failure. Fatal for the listener that raised it only.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {transport} listener on {addr}: {source}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read local address of {transport} listener: {source}")]
    LocalAddr {
        transport: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Failure delivering one frame or datagram to one endpoint.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("endpoint is closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Returned when a domain event could not be queued for fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("event queue is full, event dropped")]
    QueueFull,
    #[error("event queue is closed, event dropped")]
    Closed,
}
