use std::net::SocketAddr;

use tokio::time::Instant;

use super::protocol::Preferences;
use crate::core::Registry;

pub type DatagramRegistry = Registry<SocketAddr, DatagramEndpoint>;

/// A registered notification address.
#[derive(Debug, Clone)]
pub struct DatagramEndpoint {
    pub user_id: String,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub preferences: Preferences,
}

impl DatagramEndpoint {
    pub fn new(user_id: impl Into<String>, addr: SocketAddr, preferences: Preferences) -> Self {
        Self {
            user_id: user_id.into(),
            addr,
            last_seen: Instant::now(),
            preferences,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}
