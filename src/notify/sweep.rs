//! Liveness sweep for datagram endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use super::endpoint::DatagramRegistry;

/// Remove every endpoint silent for longer than `window`.
///
/// Runs as one pass under the registry write lock.
pub async fn sweep_inactive(registry: &DatagramRegistry, window: Duration) -> Vec<SocketAddr> {
    let now = Instant::now();
    let removed = registry
        .retain(|_, endpoint| now.saturating_duration_since(endpoint.last_seen) <= window)
        .await;

    for addr in &removed {
        info!(addr = %addr, "Removed inactive notification client");
    }
    removed
}

pub(super) async fn run(
    registry: Arc<DatagramRegistry>,
    every: Duration,
    window: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let every = every.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sweep_inactive(&registry, window).await;
                debug!(removed = removed.len(), "Notification liveness sweep");
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Registry;
    use crate::notify::endpoint::DatagramEndpoint;
    use crate::notify::protocol::Preferences;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn register(registry: &DatagramRegistry, port: u16) {
        registry
            .put(
                addr(port),
                DatagramEndpoint::new("u1", addr(port), Preferences::with_defaults(None)),
            )
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_endpoint_is_swept() {
        let registry = Registry::new();
        register(&registry, 4000).await;

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert!(sweep_inactive(&registry, Duration::from_secs(300)).await.is_empty());

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert_eq!(
            sweep_inactive(&registry, Duration::from_secs(300)).await,
            vec![addr(4000)]
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinging_endpoint_survives_indefinitely() {
        let registry = Arc::new(Registry::new());
        register(&registry, 4001).await;
        register(&registry, 4002).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweeper = tokio::spawn(run(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(300),
            shutdown_rx,
        ));

        // 4001 pings every four minutes for half an hour; 4002 stays silent.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_secs(4 * 60)).await;
            registry.modify(&addr(4001), |e| e.touch()).await;
        }

        assert!(registry.contains(&addr(4001)).await);
        assert!(!registry.contains(&addr(4002)).await);

        shutdown_tx.send(()).unwrap();
        sweeper.await.unwrap();
    }
}
