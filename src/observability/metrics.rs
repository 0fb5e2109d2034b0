//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by outcome
//!   (forwarded, rejected, upstream_error, client_error)
//! - `gateway_rejections_total` (counter): policy rejections by rule
//! - `gateway_config_reloads_total` (counter): reload attempts by result
//! - `gateway_upstream_duration_seconds` (histogram): upstream round trip
//!
//! Without an installed recorder every call here is a no-op.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Rejected,
    UpstreamError,
    ClientError,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Rejected => "rejected",
            Outcome::UpstreamError => "upstream_error",
            Outcome::ClientError => "client_error",
        }
    }
}

pub fn record_request(outcome: Outcome) {
    counter!("gateway_requests_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_rejection(rule: &'static str) {
    counter!("gateway_rejections_total", "rule" => rule).increment(1);
}

pub fn record_upstream_latency(start: Instant) {
    histogram!("gateway_upstream_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_config_reload(success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!("gateway_config_reloads_total", "result" => result).increment(1);
}
