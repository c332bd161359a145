//! Per-identity rerouting state.
//!
//! [`owner`] runs the rate limiting task, [`exchange`] hands its snapshots to
//! readers, and [`snapshot`] is the immutable value passed between them.

pub mod clock;
pub mod exchange;
pub mod owner;
pub mod snapshot;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use exchange::{ExchangeError, PublishOutcome, SnapshotPublisher, SnapshotReader};
pub use owner::{RateLimitHandle, RateLimitOwner, RateLimitState, Transition};
pub use snapshot::{Destination, RouteSnapshot};
pub use window::SlidingWindow;

use std::sync::Arc;

use crate::config::{Backend, Config};
use crate::telemetry::Metrics;

/// Handles to the running routing tasks
#[derive(Debug, Clone)]
pub struct Routing {
    pub observer: RateLimitHandle,
    pub reader: SnapshotReader,
}

/// Spawn the owner and broker tasks for `config`.
///
/// Both run until the returned handles are dropped.
pub fn spawn(config: &Config, clock: Arc<dyn Clock>, metrics: Option<Arc<Metrics>>) -> Routing {
    let pool: Arc<[Backend]> = config.backends.clone().into();
    let state = RateLimitState::new(&config.rate_limit, pool, config.overflow.clone(), clock.now());
    let (publisher, reader, broker) = exchange::channel(Arc::clone(state.current()));
    let (owner, observer) = RateLimitOwner::new(state, clock, publisher, metrics);
    tokio::spawn(broker.run());
    tokio::spawn(owner.run());
    Routing { observer, reader }
}
