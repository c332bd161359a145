use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
    pub const STATUS_CODE: &str = "status_code";
    pub const METHOD: &str = "method";
    pub const ROUTE: &str = "route";
    pub const BACKEND_ADDRESS: &str = "backend_address";
    pub const REASON: &str = "reason";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

pub mod values {
    pub const ROUTE_DEFAULT: &str = "default";
    pub const ROUTE_OVERRIDE: &str = "override";
    pub const ROUTE_BYPASS: &str = "bypass";
    pub const ROUTE_TRUSTED_SOURCE: &str = "trusted_source";
    pub const ROUTE_FALLBACK: &str = "fallback";
    pub const ROUTE_REJECTED: &str = "rejected";
    pub const REASON_FULL: &str = "full";
    pub const REASON_CLOSED: &str = "closed";
    pub const REASON_TIMEOUT: &str = "timeout";
    pub const ERROR_METHOD: &str = "method_not_allowed";
    pub const ERROR_BODY_TOO_LARGE: &str = "body_too_large";
    pub const ERROR_BODY_READ: &str = "body_read";
}

#[derive(Clone)]
pub struct Metrics {
    pub connections_total: Counter<u64>,
    pub connections_active: UpDownCounter<i64>,

    pub requests_total: Counter<u64>,
    pub requests_duration_seconds: Histogram<f64>,

    pub backend_requests_total: Counter<u64>,
    pub backend_errors_total: Counter<u64>,
    pub backend_duration_seconds: Histogram<f64>,

    pub errors_total: Counter<u64>,

    // Rerouting state
    pub reroutes_total: Counter<u64>,
    pub ban_resets_total: Counter<u64>,
    pub overrides_active: Gauge<u64>,
    pub snapshot_publish_dropped_total: Counter<u64>,
    pub exchange_fallbacks_total: Counter<u64>,

    // Traffic accounting
    pub traffic_events_dropped_total: Counter<u64>,
    pub traffic_flushes_total: Counter<u64>,

    pub build_info: Gauge<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            connections_total: meter
                .u64_counter("shunt_connections_total")
                .with_description("Total number of client connections accepted")
                .build(),
            connections_active: meter
                .i64_up_down_counter("shunt_connections_active")
                .with_description("Number of open client connections")
                .build(),

            requests_total: meter
                .u64_counter("shunt_requests_total")
                .with_description("Total number of requests processed")
                .build(),
            requests_duration_seconds: meter
                .f64_histogram("shunt_requests_duration_seconds")
                .with_description("Request duration in seconds")
                .build(),

            backend_requests_total: meter
                .u64_counter("shunt_backend_requests_total")
                .with_description("Total number of requests forwarded to backends")
                .build(),
            backend_errors_total: meter
                .u64_counter("shunt_backend_errors_total")
                .with_description("Total number of failed or timed out backend requests")
                .build(),
            backend_duration_seconds: meter
                .f64_histogram("shunt_backend_duration_seconds")
                .with_description("Backend request duration in seconds")
                .build(),

            errors_total: meter
                .u64_counter("shunt_errors_total")
                .with_description("Total number of requests rejected before forwarding")
                .build(),

            reroutes_total: meter
                .u64_counter("shunt_reroutes_total")
                .with_description("Total number of identities moved to the overflow backend")
                .build(),
            ban_resets_total: meter
                .u64_counter("shunt_ban_resets_total")
                .with_description("Total number of times all overrides were cleared")
                .build(),
            overrides_active: meter
                .u64_gauge("shunt_overrides_active")
                .with_description("Identities currently routed to the overflow backend")
                .build(),
            snapshot_publish_dropped_total: meter
                .u64_counter("shunt_snapshot_publish_dropped_total")
                .with_description("Routing snapshots not handed to the broker. reason=full|closed")
                .build(),
            exchange_fallbacks_total: meter
                .u64_counter("shunt_exchange_fallbacks_total")
                .with_description("Requests routed to the default pool because routing state was unavailable")
                .build(),

            traffic_events_dropped_total: meter
                .u64_counter("shunt_traffic_events_dropped_total")
                .with_description("Traffic events dropped because the accounting queue was full")
                .build(),
            traffic_flushes_total: meter
                .u64_counter("shunt_traffic_flushes_total")
                .with_description("Total number of traffic aggregate flushes")
                .build(),

            build_info: meter
                .u64_gauge("shunt_build_info")
                .with_description("Build information (version, rust version)")
                .build(),
        }
    }

    /// Set build info metric with version labels
    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_request(&self, method: &str, status_code: u16, route: &str, duration: f64) {
        let attrs = [
            KeyValue::new(labels::METHOD, method.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
            KeyValue::new(labels::ROUTE, route.to_string()),
        ];
        self.requests_total.add(1, &attrs);
        self.requests_duration_seconds.record(duration, &attrs);
    }

    pub fn record_backend_request(&self, backend: &str, status_code: u16, duration: f64) {
        let attrs = [
            KeyValue::new(labels::BACKEND_ADDRESS, backend.to_string()),
            KeyValue::new(labels::STATUS_CODE, status_code.to_string()),
        ];
        self.backend_requests_total.add(1, &attrs);
        self.backend_duration_seconds.record(duration, &attrs);
    }

    pub fn record_backend_error(&self, backend: &str, error_type: &str) {
        self.backend_errors_total.add(
            1,
            &[
                KeyValue::new(labels::BACKEND_ADDRESS, backend.to_string()),
                KeyValue::new(labels::ERROR_TYPE, error_type.to_string()),
            ],
        );
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new(labels::ERROR_TYPE, error_type.to_string())]);
    }

    pub fn record_reroute(&self, overrides_active: usize) {
        self.reroutes_total.add(1, &[]);
        self.overrides_active.record(overrides_active as u64, &[]);
    }

    pub fn record_ban_reset(&self) {
        self.ban_resets_total.add(1, &[]);
        self.overrides_active.record(0, &[]);
    }

    pub fn record_snapshot_dropped(&self, reason: &str) {
        self.snapshot_publish_dropped_total
            .add(1, &[KeyValue::new(labels::REASON, reason.to_string())]);
    }

    pub fn record_exchange_fallback(&self, reason: &str) {
        self.exchange_fallbacks_total
            .add(1, &[KeyValue::new(labels::REASON, reason.to_string())]);
    }

    pub fn record_traffic_event_dropped(&self) {
        self.traffic_events_dropped_total.add(1, &[]);
    }

    pub fn record_traffic_flush(&self) {
        self.traffic_flushes_total.add(1, &[]);
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("shunt-proxy");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}
