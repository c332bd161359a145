use ahash::{AHashMap, AHashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::sink::MetricsSink;
use crate::telemetry::Metrics;

/// Events buffered between dispatch and the counter task
pub const EVENT_QUEUE: usize = 1024;

pub const REQUEST_COUNT: &str = "request.count";
pub const NUM_SOURCE: &str = "num.source";
pub const NUM_USERID: &str = "num.userid";

/// One dispatched request, as seen by the traffic counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficEvent {
    pub appid: String,
    pub source: IpAddr,
    pub identity: String,
}

#[derive(Debug, Default)]
struct AppTraffic {
    requests: u64,
    sources: AHashSet<IpAddr>,
    identities: AHashSet<String>,
}

/// Per-appid aggregates for the current period
pub struct TrafficCounter<S> {
    monitored: AHashSet<String>,
    apps: AHashMap<String, AppTraffic>,
    sink: S,
}

impl<S: MetricsSink> TrafficCounter<S> {
    pub fn new<I: IntoIterator<Item = String>>(monitored: I, sink: S) -> Self {
        Self { monitored: monitored.into_iter().collect(), apps: AHashMap::new(), sink }
    }

    /// Add an event; appids outside the monitored list are ignored.
    pub fn record(&mut self, event: TrafficEvent) -> bool {
        if !self.monitored.contains(&event.appid) {
            return false;
        }
        let app = self.apps.entry(event.appid).or_default();
        app.requests = app.requests.saturating_add(1);
        app.sources.insert(event.source);
        app.identities.insert(event.identity);
        true
    }

    /// Emit every aggregate to the sink and start a new period.
    ///
    /// An appid seen once keeps reporting (zeros included) on later flushes.
    pub fn flush(&mut self) {
        for (appid, app) in self.apps.iter_mut() {
            let tags = [format!("appid:{appid}")];
            if app.requests > 0 {
                self.sink.count(REQUEST_COUNT, app.requests, &tags);
            }
            self.sink.gauge(NUM_SOURCE, app.sources.len() as u64, &tags);
            self.sink.gauge(NUM_USERID, app.identities.len() as u64, &tags);
            if !app.sources.is_empty() {
                debug!(appid = %appid, sources = ?app.sources, "distinct sources this period");
            }
            *app = AppTraffic::default();
        }
    }

    /// Run until every [`TrafficHandle`] is dropped, flushing once more at the end.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<TrafficEvent>,
        period: Duration,
        metrics: Option<Arc<Metrics>>,
    ) {
        let period = period.max(Duration::from_millis(1));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(event) => {
                        self.record(event);
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    self.flush();
                    if let Some(metrics) = &metrics {
                        metrics.record_traffic_flush();
                    }
                }
            }
        }
        self.flush();
        debug!("traffic counter stopped");
    }
}

/// Non-blocking event sender used by dispatch
#[derive(Clone)]
pub struct TrafficHandle {
    tx: mpsc::Sender<TrafficEvent>,
    metrics: Option<Arc<Metrics>>,
}

impl TrafficHandle {
    /// Queue `event`; dropped if the queue is full.
    pub fn send(&self, event: TrafficEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_traffic_event_dropped();
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("traffic counter closed, event dropped");
            }
        }
    }
}

/// Spawn the counter task and return its sender.
pub fn spawn<S: MetricsSink>(
    counter: TrafficCounter<S>,
    period: Duration,
    metrics: Option<Arc<Metrics>>,
) -> TrafficHandle {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(counter.run(rx, period, metrics.clone()));
    TrafficHandle { tx, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::sink::{RecordingSink, Sample, SampleKind};
    use std::net::Ipv4Addr;

    fn event(appid: &str, ip: u8, identity: &str) -> TrafficEvent {
        TrafficEvent {
            appid: appid.to_string(),
            source: IpAddr::V4(Ipv4Addr::new(10, 0, 0, ip)),
            identity: identity.to_string(),
        }
    }

    fn find<'a>(samples: &'a [Sample], name: &str, appid: &str) -> Option<&'a Sample> {
        let tag = format!("appid:{appid}");
        samples.iter().find(|s| s.name == name && s.tags.contains(&tag))
    }

    #[test]
    fn only_monitored_appids_are_counted() {
        let sink = RecordingSink::new();
        let mut counter = TrafficCounter::new(vec!["app1".to_string()], sink.clone());
        assert!(counter.record(event("app1", 1, "u1")));
        assert!(!counter.record(event("other", 1, "u1")));
        counter.flush();
        let samples = sink.drain();
        assert!(find(&samples, REQUEST_COUNT, "app1").is_some());
        assert!(samples.iter().all(|s| !s.tags.contains(&"appid:other".to_string())));
    }

    #[test]
    fn flush_reports_distinct_sources_and_identities() {
        let sink = RecordingSink::new();
        let mut counter = TrafficCounter::new(vec!["app1".to_string()], sink.clone());
        counter.record(event("app1", 1, "u1"));
        counter.record(event("app1", 1, "u2"));
        counter.record(event("app1", 2, "u2"));
        counter.flush();

        let samples = sink.drain();
        let requests = find(&samples, REQUEST_COUNT, "app1");
        assert_eq!(requests.map(|s| (s.kind, s.value)), Some((SampleKind::Count, 3)));
        assert_eq!(find(&samples, NUM_SOURCE, "app1").map(|s| s.value), Some(2));
        assert_eq!(find(&samples, NUM_USERID, "app1").map(|s| s.value), Some(2));
    }

    #[test]
    fn aggregates_reset_after_flush() {
        let sink = RecordingSink::new();
        let mut counter = TrafficCounter::new(vec!["app1".to_string()], sink.clone());
        counter.record(event("app1", 1, "u1"));
        counter.flush();
        sink.drain();

        counter.flush();
        let samples = sink.drain();
        assert!(find(&samples, REQUEST_COUNT, "app1").is_none());
        assert_eq!(find(&samples, NUM_SOURCE, "app1").map(|s| s.value), Some(0));
        assert_eq!(find(&samples, NUM_USERID, "app1").map(|s| s.value), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn task_flushes_on_period() {
        let sink = RecordingSink::new();
        let counter = TrafficCounter::new(vec!["app1".to_string()], sink.clone());
        let handle = spawn(counter, Duration::from_secs(10), None);

        handle.send(event("app1", 1, "u1"));
        handle.send(event("app1", 2, "u1"));
        tokio::time::sleep(Duration::from_secs(11)).await;

        let samples = sink.drain();
        assert_eq!(find(&samples, REQUEST_COUNT, "app1").map(|s| s.value), Some(2));
        assert_eq!(find(&samples, NUM_SOURCE, "app1").map(|s| s.value), Some(2));
    }
}
