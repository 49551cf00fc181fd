//! Handling of one inbound datagram.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::endpoint::{DatagramEndpoint, DatagramRegistry};
use super::protocol::{ControlMessage, ControlReply, Pong, Preferences};
use crate::core::clock::unix_timestamp;
use crate::error::DeliveryError;
use crate::logging::LogThrottle;

/// Parse and act on one datagram from `addr`.
///
/// Datagrams are untrusted: anything that does not decode is dropped without
/// a reply.
pub(super) async fn handle_datagram(
    socket: &UdpSocket,
    registry: &DatagramRegistry,
    data: &[u8],
    addr: SocketAddr,
    send_timeout: Duration,
    junk_log: &LogThrottle,
) {
    let message = match serde_json::from_slice::<ControlMessage>(data) {
        Ok(message) => message,
        Err(e) => {
            if let Some(suppressed) = junk_log.check() {
                debug!(addr = %addr, error = %e, suppressed, "Dropping undecodable datagram");
            }
            return;
        }
    };

    match message {
        ControlMessage::Register {
            user_id,
            preferences,
        } => {
            let preferences = Preferences::with_defaults(preferences);
            let endpoint = DatagramEndpoint::new(user_id.clone(), addr, preferences.clone());
            registry.put(addr, endpoint).await;
            info!(addr = %addr, user_id = %user_id, preferences = ?preferences, "Notification client registered");

            let reply = ControlReply::Registered {
                message: "Successfully registered for notifications".to_string(),
                preferences,
                timestamp: unix_timestamp(),
            };
            reply_to(socket, addr, &reply, send_timeout).await;
        }
        ControlMessage::Unregister { .. } => {
            if registry.remove(&addr).await.is_some() {
                info!(addr = %addr, "Notification client unregistered");
            }
            let reply = ControlReply::Unregistered {
                message: "Successfully unregistered from notifications".to_string(),
            };
            reply_to(socket, addr, &reply, send_timeout).await;
        }
        ControlMessage::Ping => {
            registry.modify(&addr, |endpoint| endpoint.touch()).await;
            let reply = Pong {
                timestamp: unix_timestamp(),
            };
            reply_to(socket, addr, &reply, send_timeout).await;
        }
    }
}

async fn reply_to<T: Serialize>(socket: &UdpSocket, addr: SocketAddr, reply: &T, deadline: Duration) {
    let result = match serde_json::to_vec(reply) {
        Ok(bytes) => send_datagram(socket, addr, &bytes, deadline).await,
        Err(e) => Err(DeliveryError::Encode(e)),
    };
    if let Err(e) = result {
        warn!(addr = %addr, error = %e, "Failed to reply to notification client");
    }
}

pub(super) async fn send_datagram(
    socket: &UdpSocket,
    addr: SocketAddr,
    bytes: &[u8],
    deadline: Duration,
) -> Result<(), DeliveryError> {
    match tokio::time::timeout(deadline, socket.send_to(bytes, addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(DeliveryError::Io(e)),
        Err(_) => Err(DeliveryError::Timeout(deadline)),
    }
}
