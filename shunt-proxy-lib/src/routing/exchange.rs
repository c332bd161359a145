//! Single-writer, many-reader handoff of the current [`RouteSnapshot`].
//!
//! A broker task owns the current snapshot as a local variable and waits on
//! two channels at once:
//!
//! - a one-slot publish channel fed by the rate limiting owner, and
//! - a request channel on which readers send a one-shot reply sender.
//!
//! Publishing never waits: if the slot still holds an unconsumed snapshot
//! the new one is dropped and reported to the publisher. Readers never wait
//! on the writer either; the broker only clones an `Arc` to answer them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::snapshot::RouteSnapshot;

/// Pending reader requests the broker will queue before readers wait on send
const READ_QUEUE: usize = 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("routing state task is gone")]
    Closed,

    #[error("timed out waiting for routing state")]
    Timeout,
}

/// Result of a non-blocking publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    /// The slot still held an unconsumed snapshot; this one was dropped
    Dropped,
    /// The broker is gone
    Closed,
}

/// Write side, held only by the rate limiting owner
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: mpsc::Sender<Arc<RouteSnapshot>>,
}

impl SnapshotPublisher {
    pub fn publish(&self, snapshot: Arc<RouteSnapshot>) -> PublishOutcome {
        match self.tx.try_send(snapshot) {
            Ok(()) => PublishOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => PublishOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => PublishOutcome::Closed,
        }
    }
}

/// Read side; cheap to clone, one per request handler
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    tx: mpsc::Sender<oneshot::Sender<Arc<RouteSnapshot>>>,
}

impl SnapshotReader {
    /// Fetch the snapshot the broker currently holds.
    pub async fn read(&self) -> Result<Arc<RouteSnapshot>, ExchangeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(reply_tx).await.map_err(|_| ExchangeError::Closed)?;
        reply_rx.await.map_err(|_| ExchangeError::Closed)
    }

    /// Like [`SnapshotReader::read`], bounded by `limit`.
    pub async fn read_timeout(&self, limit: Duration) -> Result<Arc<RouteSnapshot>, ExchangeError> {
        tokio::time::timeout(limit, self.read())
            .await
            .map_err(|_| ExchangeError::Timeout)?
    }
}

/// Broker task state
pub struct SnapshotBroker {
    current: Arc<RouteSnapshot>,
    publish_rx: mpsc::Receiver<Arc<RouteSnapshot>>,
    read_rx: mpsc::Receiver<oneshot::Sender<Arc<RouteSnapshot>>>,
}

/// Create the three ends of the exchange around `initial`.
pub fn channel(initial: Arc<RouteSnapshot>) -> (SnapshotPublisher, SnapshotReader, SnapshotBroker) {
    let (publish_tx, publish_rx) = mpsc::channel(1);
    let (read_tx, read_rx) = mpsc::channel(READ_QUEUE);
    (
        SnapshotPublisher { tx: publish_tx },
        SnapshotReader { tx: read_tx },
        SnapshotBroker { current: initial, publish_rx, read_rx },
    )
}

impl SnapshotBroker {
    /// Serve until every reader is dropped.
    ///
    /// Publishes are polled first so a reader arriving together with a new
    /// snapshot gets the new one.
    pub async fn run(mut self) {
        let mut publisher_open = true;
        loop {
            tokio::select! {
                biased;
                next = self.publish_rx.recv(), if publisher_open => match next {
                    Some(snapshot) => self.accept(snapshot),
                    None => {
                        debug!("snapshot publisher closed, serving last snapshot");
                        publisher_open = false;
                    }
                },
                request = self.read_rx.recv() => match request {
                    // the reader may have given up; nothing to do then
                    Some(reply) => {
                        let _ = reply.send(Arc::clone(&self.current));
                    }
                    None => break,
                },
            }
        }
        debug!("snapshot broker stopped");
    }

    fn accept(&mut self, snapshot: Arc<RouteSnapshot>) {
        if snapshot.is_newer_than(&self.current) {
            self.current = snapshot;
        } else {
            debug!(
                held = self.current.generation(),
                offered = snapshot.generation(),
                "discarding stale snapshot"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use std::time::Instant;

    fn initial() -> Arc<RouteSnapshot> {
        Arc::new(RouteSnapshot::initial(vec![Backend::new("a:1")].into(), Instant::now()))
    }

    #[tokio::test]
    async fn reader_gets_initial_snapshot() -> Result<(), ExchangeError> {
        let (_publisher, reader, broker) = channel(initial());
        tokio::spawn(broker.run());
        let snap = reader.read().await?;
        assert_eq!(snap.generation(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn published_snapshot_replaces_held_one() -> Result<(), ExchangeError> {
        let first = initial();
        let (publisher, reader, broker) = channel(Arc::clone(&first));
        tokio::spawn(broker.run());

        let next = Arc::new(first.with_override("123", Backend::new("o:1"), Instant::now()));
        assert_eq!(publisher.publish(next), PublishOutcome::Delivered);

        // biased select: the publish is consumed before this read is answered
        let snap = reader.read().await?;
        assert!(snap.is_overridden("123"));
        assert!(!first.is_overridden("123"));
        Ok(())
    }

    #[tokio::test]
    async fn stale_snapshot_is_discarded() -> Result<(), ExchangeError> {
        let first = initial();
        let t = Instant::now();
        let newer = Arc::new(first.with_override("a", Backend::new("o:1"), t).reset(t));
        let stale = Arc::new(first.with_override("b", Backend::new("o:1"), t));
        let (publisher, reader, broker) = channel(newer);
        tokio::spawn(broker.run());

        assert_eq!(publisher.publish(stale), PublishOutcome::Delivered);
        let snap = reader.read().await?;
        assert_eq!(snap.generation(), 2);
        assert!(!snap.is_overridden("b"));
        Ok(())
    }

    #[tokio::test]
    async fn full_slot_drops_newer_publish() {
        let first = initial();
        // broker not running, so the first publish stays in the slot
        let (publisher, _reader, _broker) = channel(Arc::clone(&first));
        let t = Instant::now();
        let one = Arc::new(first.with_override("1", Backend::new("o:1"), t));
        let two = Arc::new(one.with_override("2", Backend::new("o:1"), t));
        assert_eq!(publisher.publish(one), PublishOutcome::Delivered);
        assert_eq!(publisher.publish(two), PublishOutcome::Dropped);
    }

    #[tokio::test]
    async fn read_fails_when_broker_is_gone() {
        let (_publisher, reader, broker) = channel(initial());
        drop(broker);
        assert_eq!(reader.read().await.err(), Some(ExchangeError::Closed));
    }
}
