use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::telemetry::Metrics;

use super::guards::ConnectionGuard;

/// Errors that can occur when trying to accept a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Server is shutting down")]
    Shutdown,
}

/// Tracks open client connections so shutdown can wait for them
pub struct ConnectionManager {
    active_connections: Arc<AtomicUsize>,
    shutting_down: AtomicBool,
    closed_tx: watch::Sender<()>,
    closed_rx: watch::Receiver<()>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (closed_tx, closed_rx) = watch::channel(());
        Self {
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutting_down: AtomicBool::new(false),
            closed_tx,
            closed_rx,
        }
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Register a new connection
    /// Returns Ok(guard) if connection is accepted, Err(ConnectionError) if rejected
    pub fn try_accept(
        &self,
        metrics: Option<&Arc<Metrics>>,
    ) -> Result<ConnectionGuard, ConnectionError> {
        if self.is_shutdown() {
            return Err(ConnectionError::Shutdown);
        }

        self.active_connections.fetch_add(1, Ordering::Relaxed);

        if let Some(m) = metrics {
            m.connections_total.add(1, &[]);
            m.connections_active.add(1, &[]);
        }

        Ok(ConnectionGuard::new(
            self.active_connections.clone(),
            self.closed_tx.clone(),
            metrics.map(|m| m.connections_active.clone()),
        ))
    }

    /// Wait until every connection has closed or `limit` has passed.
    pub async fn drain(&self, limit: Duration) {
        let mut closed = self.closed_rx.clone();
        let wait = async {
            while self.active() > 0 {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        };
        match tokio::time::timeout(limit, wait).await {
            Ok(()) => info!("All connections closed, shutdown complete"),
            Err(_) => warn!(
                active_connections = self.active(),
                "Shutdown timeout reached, closing remaining connections"
            ),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_when_last_connection_closes() -> Result<(), ConnectionError> {
        let manager = Arc::new(ConnectionManager::new());
        let first = manager.try_accept(None)?;
        let second = manager.try_accept(None)?;
        assert_eq!(manager.active(), 2);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
            drop(second);
        });
        manager.drain(Duration::from_secs(5)).await;
        assert_eq!(manager.active(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn no_connections_after_shutdown() {
        let manager = ConnectionManager::new();
        manager.begin_shutdown();
        assert!(matches!(manager.try_accept(None), Err(ConnectionError::Shutdown)));
    }
}
