//! Per-appid traffic accounting exported to a DogStatsD sink.

pub mod counter;
pub mod sink;

pub use counter::{TrafficCounter, TrafficEvent, TrafficHandle};
pub use sink::{MetricsSink, RecordingSink, StatsdSink};

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TrafficConfig;
use crate::telemetry::Metrics;

/// Start the counter if a sink address is configured.
///
/// `monitored` is the merged list of appids to aggregate. Returns `None`
/// when traffic export is disabled or the sink socket cannot be set up;
/// dispatch then skips traffic events.
pub async fn start(config: &TrafficConfig, metrics: Option<Arc<Metrics>>) -> Option<TrafficHandle> {
    let addr = config.statsd_addr.as_deref()?;
    let sink = match StatsdSink::connect(addr, config.namespace.clone(), config.tags.clone()).await {
        Ok(sink) => sink,
        Err(e) => {
            warn!(error = %e, addr, "statsd sink unavailable, traffic export disabled");
            return None;
        }
    };
    info!(addr, appids = config.monitored_appids.len(), "traffic export enabled");
    let counter = TrafficCounter::new(config.monitored_appids.iter().cloned(), sink);
    Some(counter::spawn(counter, config.flush_period(), metrics))
}
