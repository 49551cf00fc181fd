//! Per-connection session task.
//!
//! Lifecycle: handshake (bounded by the handshake timeout), register,
//! confirm, then read frames until EOF, error, idle timeout, endpoint close
//! or server shutdown. The endpoint is removed from the registry on every
//! exit path.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SyncConfig;
use super::endpoint::{StreamEndpoint, StreamRegistry};
use super::protocol::{ClientFrame, Confirmation, Handshake, ServerFrame, encode_line};
use crate::core::clock::unix_timestamp;

type Lines = FramedRead<OwnedReadHalf, LinesCodec>;

#[derive(Debug, Error)]
enum HandshakeError {
    #[error("no handshake within {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection closed before handshake")]
    Eof,
    #[error("failed to read handshake: {0}")]
    Read(#[from] LinesCodecError),
    #[error("malformed handshake: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("empty user_id in handshake")]
    EmptyUserId,
}

/// Why the read loop ended.
#[derive(Debug)]
enum Exit {
    Eof,
    IdleTimeout,
    ReadError(LinesCodecError),
    EndpointClosed,
    Shutdown,
}

pub(super) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<StreamRegistry>,
    config: SyncConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(config.max_frame_bytes));

    let handshake = tokio::select! {
        result = read_handshake(&mut lines, &config) => result,
        _ = shutdown.recv() => return,
    };

    let user_id = match handshake {
        Ok(handshake) => handshake.user_id,
        Err(e) => {
            // Dropping both halves closes the socket; nothing was registered.
            debug!(peer = %peer, error = %e, "Rejected sync connection");
            return;
        }
    };

    let client_id = format!("{}_{}", user_id, Uuid::now_v7().simple());
    let endpoint = StreamEndpoint::new(user_id.clone(), writer);

    registry.put(client_id.clone(), endpoint.clone()).await;
    let total_clients = registry.len().await;
    info!(
        client_id = %client_id,
        user_id = %user_id,
        peer = %peer,
        total_clients,
        "Sync client connected"
    );

    let exit = match encode_line(&Confirmation::connected(client_id.clone())) {
        Ok(frame) => match endpoint.send(&frame, config.write_timeout).await {
            Ok(()) => read_loop(&mut lines, &endpoint, &config, &mut shutdown).await,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Failed to confirm sync client");
                Exit::EndpointClosed
            }
        },
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Failed to encode confirmation");
            Exit::EndpointClosed
        }
    };

    endpoint.close();
    registry.remove(&client_id).await;
    let remaining_clients = registry.len().await;
    info!(
        client_id = %client_id,
        reason = ?exit,
        remaining_clients,
        "Sync client disconnected"
    );
}

async fn read_handshake(lines: &mut Lines, config: &SyncConfig) -> Result<Handshake, HandshakeError> {
    let line = match timeout(config.handshake_timeout, lines.next()).await {
        Err(_) => return Err(HandshakeError::Timeout(config.handshake_timeout)),
        Ok(None) => return Err(HandshakeError::Eof),
        Ok(Some(line)) => line?,
    };

    let handshake: Handshake = serde_json::from_str(line.trim())?;
    if handshake.user_id.trim().is_empty() {
        return Err(HandshakeError::EmptyUserId);
    }
    Ok(handshake)
}

async fn read_loop(
    lines: &mut Lines,
    endpoint: &StreamEndpoint,
    config: &SyncConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Exit {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.recv() => return Exit::Shutdown,
            _ = endpoint.closed() => return Exit::EndpointClosed,
            next = timeout(config.idle_timeout, lines.next()) => next,
        };

        let line = match next {
            Err(_) => return Exit::IdleTimeout,
            Ok(None) => return Exit::Eof,
            Ok(Some(Err(e))) => return Exit::ReadError(e),
            Ok(Some(Ok(line))) => line,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<ClientFrame>(trimmed) {
            Ok(ClientFrame::Heartbeat) => {
                let ack = ServerFrame::HeartbeatAck {
                    timestamp: unix_timestamp(),
                };
                let sent = match encode_line(&ack) {
                    Ok(frame) => endpoint.send(&frame, config.write_timeout).await.is_ok(),
                    Err(_) => false,
                };
                if !sent {
                    return Exit::EndpointClosed;
                }
            }
            Ok(ClientFrame::Unknown) => {}
            Err(e) => debug!(error = %e, "Ignoring malformed sync frame"),
        }
    }
}
