//! Registered stream endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::Registry;
use crate::error::DeliveryError;

pub type StreamRegistry = Registry<String, StreamEndpoint>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one authenticated sync connection.
///
/// The read side stays with the session task. Writes from the session
/// (heartbeat acks) and from the dispatcher are serialized by the writer
/// mutex. A failed write closes the endpoint, which the session task observes
/// and then removes the endpoint from the registry.
#[derive(Clone)]
pub struct StreamEndpoint {
    pub user_id: String,
    writer: Arc<Mutex<BoxedWriter>>,
    closed: CancellationToken,
}

impl StreamEndpoint {
    pub fn new<W>(user_id: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            user_id: user_id.into(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            closed: CancellationToken::new(),
        }
    }

    /// Write one encoded frame, giving up after `deadline`.
    ///
    /// Any failure closes the endpoint.
    pub async fn send(&self, frame: &[u8], deadline: Duration) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(frame).await?;
            writer.flush().await
        };

        let result = match tokio::time::timeout(deadline, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Io(e)),
            Err(_) => Err(DeliveryError::Timeout(deadline)),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Mark the endpoint dead. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the endpoint has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}
