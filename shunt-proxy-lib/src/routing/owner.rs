//! The rate limiting task: sole owner of the per-identity windows and of the
//! current [`RouteSnapshot`].
//!
//! Dispatch sends one [`Observation`] per request and waits for the reply,
//! which is the owner's snapshot after the observation was applied. Every
//! snapshot change is also published to the broker for readers that must not
//! be counted (bypass requests).

use ahash::AHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::exchange::{ExchangeError, PublishOutcome, SnapshotPublisher};
use super::snapshot::RouteSnapshot;
use super::window::SlidingWindow;
use crate::config::{Backend, RateLimitConfig};
use crate::telemetry::metrics::values;
use crate::telemetry::Metrics;

/// Queued observations before senders start waiting
const OBSERVE_QUEUE: usize = 4096;

/// "Request observed for identity X", with the reply slot for the snapshot
#[derive(Debug)]
pub struct Observation {
    pub identity: String,
    pub reply: oneshot::Sender<Arc<RouteSnapshot>>,
}

/// What one observation did to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Counted; `count` requests inside the window, this one included
    Counted { count: u64 },
    /// Count exceeded the threshold; identity now routed to the overflow backend
    Rerouted { count: u64 },
    /// The ban period had elapsed; everything was cleared and this
    /// observation was not counted
    Reset,
}

/// Windows, snapshot and ban clock. Pure and synchronous; time is passed in.
#[derive(Debug)]
pub struct RateLimitState {
    window: Duration,
    buckets: usize,
    max_requests: u64,
    ban_period: Duration,
    overflow: Backend,
    current: Arc<RouteSnapshot>,
    windows: AHashMap<String, SlidingWindow>,
    last_reset: Instant,
}

impl RateLimitState {
    pub fn new(
        config: &RateLimitConfig,
        default_pool: Arc<[Backend]>,
        overflow: Backend,
        now: Instant,
    ) -> Self {
        Self {
            window: config.window(),
            buckets: config.window_buckets,
            max_requests: config.max_requests,
            ban_period: config.ban_period(),
            overflow,
            current: Arc::new(RouteSnapshot::initial(default_pool, now)),
            windows: AHashMap::new(),
            last_reset: now,
        }
    }

    pub fn current(&self) -> &Arc<RouteSnapshot> {
        &self.current
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }

    /// Clear every override and window once the ban period has been exceeded.
    pub fn reset_if_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_reset) <= self.ban_period {
            return false;
        }
        self.current = Arc::new(self.current.reset(now));
        self.windows.clear();
        self.last_reset = now;
        true
    }

    /// Apply one observation for `identity` at `now`.
    pub fn observe(&mut self, identity: &str, now: Instant) -> Transition {
        if self.reset_if_due(now) {
            return Transition::Reset;
        }

        let (window, buckets) = (self.window, self.buckets);
        let count = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| SlidingWindow::new(window, buckets, now))
            .observe(now);

        if count <= self.max_requests {
            return Transition::Counted { count };
        }

        self.current = Arc::new(self.current.with_override(identity, self.overflow.clone(), now));
        // counting starts over for this identity
        self.windows.remove(identity);
        Transition::Rerouted { count }
    }
}

/// Send side used by dispatch
#[derive(Debug, Clone)]
pub struct RateLimitHandle {
    tx: mpsc::Sender<Observation>,
}

impl RateLimitHandle {
    /// Record a request for `identity` and get the resulting snapshot.
    pub async fn observe(&self, identity: String) -> Result<Arc<RouteSnapshot>, ExchangeError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(Observation { identity, reply })
            .await
            .map_err(|_| ExchangeError::Closed)?;
        reply_rx.await.map_err(|_| ExchangeError::Closed)
    }

    /// [`RateLimitHandle::observe`], bounded by `limit`.
    pub async fn observe_timeout(
        &self,
        identity: String,
        limit: Duration,
    ) -> Result<Arc<RouteSnapshot>, ExchangeError> {
        tokio::time::timeout(limit, self.observe(identity))
            .await
            .map_err(|_| ExchangeError::Timeout)?
    }
}

/// The owner task
pub struct RateLimitOwner {
    state: RateLimitState,
    clock: Arc<dyn Clock>,
    rx: mpsc::Receiver<Observation>,
    publisher: SnapshotPublisher,
    published: u64,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimitOwner {
    pub fn new(
        state: RateLimitState,
        clock: Arc<dyn Clock>,
        publisher: SnapshotPublisher,
        metrics: Option<Arc<Metrics>>,
    ) -> (Self, RateLimitHandle) {
        let (tx, rx) = mpsc::channel(OBSERVE_QUEUE);
        let published = state.current().generation();
        let owner = Self { state, clock, rx, publisher, published, metrics };
        (owner, RateLimitHandle { tx })
    }

    /// Run until every [`RateLimitHandle`] is dropped.
    pub async fn run(mut self) {
        let period = self.state.ban_period.max(Duration::from_millis(1));
        // first tick lands just past the period so the reset is already due
        let first = tokio::time::Instant::now() + period + Duration::from_millis(1);
        let mut ban_tick = tokio::time::interval_at(first, period);
        ban_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = self.rx.recv() => match next {
                    Some(Observation { identity, reply }) => {
                        let transition = self.state.observe(&identity, self.clock.now());
                        self.after(transition, &identity);
                        // the requester may have timed out already
                        let _ = reply.send(Arc::clone(self.state.current()));
                    }
                    None => break,
                },
                _ = ban_tick.tick() => {
                    if self.state.reset_if_due(self.clock.now()) {
                        self.after(Transition::Reset, "");
                    }
                }
            }
        }
        debug!("rate limit owner stopped");
    }

    fn after(&mut self, transition: Transition, identity: &str) {
        match transition {
            Transition::Counted { .. } => {}
            Transition::Rerouted { count } => {
                let overrides = self.state.current().overrides_len();
                info!(identity, count, overrides, "identity rerouted to overflow backend");
                if let Some(metrics) = &self.metrics {
                    metrics.record_reroute(overrides);
                }
            }
            Transition::Reset => {
                info!("ban period elapsed, overrides cleared");
                if let Some(metrics) = &self.metrics {
                    metrics.record_ban_reset();
                }
            }
        }
        self.publish();
    }

    // Also retries a snapshot that was dropped earlier, once the slot is free.
    fn publish(&mut self) {
        let current = self.state.current();
        if current.generation() <= self.published {
            return;
        }
        match self.publisher.publish(Arc::clone(current)) {
            PublishOutcome::Delivered => self.published = current.generation(),
            PublishOutcome::Dropped => {
                debug!(generation = current.generation(), "snapshot slot full, publish dropped");
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot_dropped(values::REASON_FULL);
                }
            }
            PublishOutcome::Closed => {
                warn!("snapshot broker closed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot_dropped(values::REASON_CLOSED);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::clock::ManualClock;
    use crate::routing::exchange;

    fn config(max_requests: u64) -> RateLimitConfig {
        RateLimitConfig {
            window_secs: 10,
            max_requests,
            ban_period_secs: 600,
            window_buckets: 20,
        }
    }

    fn pool() -> Arc<[Backend]> {
        vec![Backend::new("a:1"), Backend::new("b:1")].into()
    }

    fn overflow() -> Backend {
        Backend::new("overflow:1")
    }

    #[test]
    fn threshold_crossing_reroutes_identity() {
        let t0 = Instant::now();
        let mut state = RateLimitState::new(&config(10), pool(), overflow(), t0);
        for i in 1..=10 {
            assert_eq!(state.observe("123", t0), Transition::Counted { count: i });
        }
        assert_eq!(state.observe("123", t0), Transition::Rerouted { count: 11 });
        assert_eq!(state.current().override_for("123"), Some(&overflow()));
    }

    #[test]
    fn other_identities_stay_on_default_pool() {
        let t0 = Instant::now();
        let mut state = RateLimitState::new(&config(3), pool(), overflow(), t0);
        for _ in 0..4 {
            state.observe("123", t0);
            state.observe("456", t0);
        }
        // both crossed on their own count, nobody else is affected
        assert!(state.current().is_overridden("123"));
        assert!(state.current().is_overridden("456"));
        assert!(!state.current().is_overridden("789"));

        let mut fresh = RateLimitState::new(&config(3), pool(), overflow(), t0);
        for _ in 0..4 {
            fresh.observe("123", t0);
        }
        fresh.observe("456", t0);
        assert!(fresh.current().is_overridden("123"));
        assert!(!fresh.current().is_overridden("456"));
    }

    #[test]
    fn counter_restarts_after_reroute() {
        let t0 = Instant::now();
        let mut state = RateLimitState::new(&config(2), pool(), overflow(), t0);
        for _ in 0..3 {
            state.observe("123", t0);
        }
        assert_eq!(state.tracked_identities(), 0);
        assert_eq!(state.observe("123", t0), Transition::Counted { count: 1 });
    }

    #[test]
    fn requests_outside_window_do_not_accumulate() {
        let t0 = Instant::now();
        let mut state = RateLimitState::new(&config(2), pool(), overflow(), t0);
        for i in 0..10 {
            let t = t0 + Duration::from_secs(6 * i);
            assert!(matches!(state.observe("123", t), Transition::Counted { .. }));
        }
        assert!(!state.current().is_overridden("123"));
    }

    #[test]
    fn ban_period_reset_clears_everything() {
        let clock = ManualClock::new();
        let mut state = RateLimitState::new(&config(1), pool(), overflow(), clock.now());
        state.observe("123", clock.now());
        state.observe("123", clock.now());
        assert!(state.current().is_overridden("123"));
        let flagged_generation = state.current().generation();

        clock.advance(Duration::from_secs(601));
        assert_eq!(state.observe("123", clock.now()), Transition::Reset);
        assert_eq!(state.current().overrides_len(), 0);
        assert!(state.current().generation() > flagged_generation);
        assert_eq!(state.tracked_identities(), 0);

        // the reset observation was not counted
        assert_eq!(state.observe("123", clock.now()), Transition::Counted { count: 1 });
    }

    #[test]
    fn reset_waits_until_ban_period_is_exceeded() {
        let clock = ManualClock::new();
        let mut state = RateLimitState::new(&config(1), pool(), overflow(), clock.now());
        state.observe("123", clock.now());
        state.observe("123", clock.now());

        clock.advance(Duration::from_secs(600));
        assert!(!state.reset_if_due(clock.now()));
        assert!(state.current().is_overridden("123"));

        clock.advance(Duration::from_nanos(1));
        assert!(state.reset_if_due(clock.now()));
        assert_eq!(state.current().overrides_len(), 0);
    }

    #[test]
    fn reroute_does_not_touch_previous_snapshot() {
        let t0 = Instant::now();
        let mut state = RateLimitState::new(&config(1), pool(), overflow(), t0);
        let before = Arc::clone(state.current());
        state.observe("123", t0);
        state.observe("123", t0);
        assert!(state.current().is_overridden("123"));
        assert!(!before.is_overridden("123"));
        assert_eq!(before.overrides_len(), 0);
    }

    fn spawn_owner(
        max_requests: u64,
        clock: Arc<dyn Clock>,
    ) -> (RateLimitHandle, exchange::SnapshotReader) {
        let state = RateLimitState::new(&config(max_requests), pool(), overflow(), clock.now());
        let (publisher, reader, broker) = exchange::channel(Arc::clone(state.current()));
        let (owner, handle) = RateLimitOwner::new(state, clock, publisher, None);
        tokio::spawn(broker.run());
        tokio::spawn(owner.run());
        (handle, reader)
    }

    #[tokio::test]
    async fn reply_reflects_the_observation() -> Result<(), ExchangeError> {
        let (handle, _reader) = spawn_owner(2, Arc::new(ManualClock::new()));
        for _ in 0..2 {
            let snap = handle.observe("123".to_string()).await?;
            assert!(!snap.is_overridden("123"));
        }
        let snap = handle.observe("123".to_string()).await?;
        assert!(snap.is_overridden("123"));
        Ok(())
    }

    #[tokio::test]
    async fn reroute_reaches_broker_readers() -> Result<(), ExchangeError> {
        let (handle, reader) = spawn_owner(1, Arc::new(ManualClock::new()));
        handle.observe("123".to_string()).await?;
        handle.observe("123".to_string()).await?;

        let mut seen = false;
        for _ in 0..50 {
            if reader.read().await?.is_overridden("123") {
                seen = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(seen);
        Ok(())
    }

    #[tokio::test]
    async fn ban_tick_clears_overrides_without_traffic() -> Result<(), ExchangeError> {
        tokio::time::pause();
        let clock = ManualClock::new();
        let (handle, reader) = spawn_owner(1, Arc::new(clock.clone()));
        handle.observe("123".to_string()).await?;
        handle.observe("123".to_string()).await?;

        clock.advance(Duration::from_secs(601));
        tokio::time::sleep(Duration::from_secs(601)).await;

        let mut cleared = false;
        for _ in 0..50 {
            if reader.read().await?.overrides_len() == 0 {
                cleared = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cleared);
        Ok(())
    }
}
