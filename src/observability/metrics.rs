//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define edge metrics (requests, assignments, cache behaviour, revalidations)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `edge_requests_total` (counter): requests by method, status
//! - `edge_request_duration_seconds` (histogram): latency distribution
//! - `edge_assignments_total` (counter): variants served by experiment, variant, fresh
//! - `edge_rewrites_total` (counter): routing-experiment path rewrites
//! - `edge_registry_failures_total` (counter): failed registry fetches (fail-open events)
//! - `edge_cache_requests_total` (counter): hits and misses by cache
//! - `edge_cache_invalidations_total` (counter): invalidations by cache and kind
//! - `edge_cache_entries` (gauge): stored entries by cache
//! - `edge_revalidations_total` (counter): revalidation calls by outcome
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so tests need no setup
//! - Labels stay low-cardinality (no keys, paths or visitor data)

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "edge_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("edge_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_assignment(experiment: &str, variant: &str, fresh: bool) {
    ::metrics::counter!(
        "edge_assignments_total",
        "experiment" => experiment.to_string(),
        "variant" => variant.to_string(),
        "fresh" => if fresh { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_rewrite(experiment: &str) {
    ::metrics::counter!("edge_rewrites_total", "experiment" => experiment.to_string()).increment(1);
}

pub fn record_registry_failure() {
    ::metrics::counter!("edge_registry_failures_total").increment(1);
}

pub fn record_cache_request(cache: &'static str, result: &'static str) {
    ::metrics::counter!("edge_cache_requests_total", "cache" => cache, "result" => result).increment(1);
}

pub fn record_cache_invalidation(cache: &'static str, kind: &'static str) {
    ::metrics::counter!("edge_cache_invalidations_total", "cache" => cache, "kind" => kind).increment(1);
}

pub fn record_cache_entries(cache: &'static str, entries: usize) {
    ::metrics::gauge!("edge_cache_entries", "cache" => cache).set(entries as f64);
}

pub fn record_revalidation(outcome: &'static str) {
    ::metrics::counter!("edge_revalidations_total", "outcome" => outcome).increment(1);
}
