//! Lightweight metrics helpers for the gateway.
//!
//! Thin wrappers over the `metrics` crate macros. [`init_metrics`] installs a
//! Prometheus recorder whose handle renders the scrape output; without an
//! installed recorder the calls below are no-ops.
//!
//! Provided metrics:
//! * `gateway_requests_total` (counter; `service`, `kind`, `outcome`, `status`)
//! * `gateway_upstream_duration_seconds` (histogram; `service`)
//! * `gateway_upstream_timeouts_total` (counter; `service`)
//! * `gateway_websocket_upgrades_total` (counter; `service`)
use std::time::{Duration, Instant};

use eyre::Context;
use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";
pub const GATEWAY_UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
pub const GATEWAY_UPSTREAM_TIMEOUTS_TOTAL: &str = "gateway_upstream_timeouts_total";
pub const GATEWAY_WEBSOCKET_UPGRADES_TOTAL: &str = "gateway_websocket_upgrades_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        GATEWAY_REQUESTS_TOTAL,
        Unit::Count,
        "Requests handled by the gateway, by upstream and outcome."
    );
    describe_histogram!(
        GATEWAY_UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Time until an upstream returned response headers or failed."
    );
    describe_counter!(
        GATEWAY_UPSTREAM_TIMEOUTS_TOTAL,
        Unit::Count,
        "Upstream calls cut off by the per-service deadline."
    );
    describe_counter!(
        GATEWAY_WEBSOCKET_UPGRADES_TOTAL,
        Unit::Count,
        "WebSocket connections relayed to an upstream."
    );
});

/// Count one handled request.
///
/// `outcome` is one of `completed`, `timed_out` or `config_missing`.
pub fn increment_requests(service: &str, kind: &str, outcome: &str, status: u16) {
    counter!(
        GATEWAY_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_upstream_duration(service: &str, duration: Duration) {
    histogram!(GATEWAY_UPSTREAM_DURATION_SECONDS, "service" => service.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_upstream_timeouts(service: &str) {
    counter!(GATEWAY_UPSTREAM_TIMEOUTS_TOTAL, "service" => service.to_string()).increment(1);
}

pub fn increment_websocket_upgrades(service: &str) {
    counter!(GATEWAY_WEBSOCKET_UPGRADES_TOTAL, "service" => service.to_string()).increment(1);
}

/// RAII helper measuring time spent waiting on an upstream.
///
/// Dropped early when the call is cancelled, so cancelled calls are still
/// recorded up to the point of cancellation.
pub struct UpstreamTimer {
    start: Instant,
    service: String,
}

impl UpstreamTimer {
    pub fn new(service: &str) -> Self {
        Self {
            start: Instant::now(),
            service: service.to_string(),
        }
    }
}

impl Drop for UpstreamTimer {
    fn drop(&mut self) {
        record_upstream_duration(&self.service, self.start.elapsed());
    }
}

/// Install the process-wide Prometheus recorder and describe every metric.
///
/// Fails if another recorder is already installed.
pub fn init_metrics() -> eyre::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    describe_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Register metric descriptions with the current recorder (idempotent).
pub fn describe_metrics() {
    Lazy::force(&DESCRIPTIONS);
}
