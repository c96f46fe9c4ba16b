//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_calls_total` (counter): invocations by operation, outcome
//! - `resilience_call_duration_seconds` (histogram): end-to-end latency
//! - `resilience_retries_total` (counter): extra attempts by target
//! - `resilience_fallback_total` (counter): tier hops by from, to
//! - `resilience_rejections_total` (counter): fast rejections by reason
//!
//! # Design Decisions
//! - The pipeline talks to a [`MetricsSink`] trait, not to a backend
//! - [`PrometheusSink`] forwards to the `metrics` facade; without an
//!   installed recorder the calls are no-ops

use std::net::SocketAddr;
use std::time::Duration;

use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

pub const CALLS_TOTAL: &str = "resilience_calls_total";
pub const CALL_DURATION_SECONDS: &str = "resilience_call_duration_seconds";
pub const RETRIES_TOTAL: &str = "resilience_retries_total";
pub const FALLBACK_TOTAL: &str = "resilience_fallback_total";
pub const REJECTIONS_TOTAL: &str = "resilience_rejections_total";

/// Destination for pipeline metrics.
pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &'static str, labels: &[(&'static str, String)]);

    fn record_latency(
        &self,
        name: &'static str,
        duration: Duration,
        labels: &[(&'static str, String)],
    );
}

/// Sink backed by the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

fn to_labels(labels: &[(&'static str, String)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl MetricsSink for PrometheusSink {
    fn increment_counter(&self, name: &'static str, labels: &[(&'static str, String)]) {
        metrics::counter!(name, to_labels(labels)).increment(1);
    }

    fn record_latency(
        &self,
        name: &'static str,
        duration: Duration,
        labels: &[(&'static str, String)],
    ) {
        metrics::histogram!(name, to_labels(labels)).record(duration.as_secs_f64());
    }
}

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter")
        }
    }
}
