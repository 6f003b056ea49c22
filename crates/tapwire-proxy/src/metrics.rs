//! Prometheus metrics for the proxy core.
//!
//! Tracks request throughput, admission denials, validation failures,
//! persistence outcomes, and replay hits/misses. The text endpoint is
//! served by the inspection server.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total number of requests processed
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tapwire_requests_total",
        "Total number of requests processed by the proxy",
        &["method", "status"]
    )
    .unwrap();

    /// End-to-end exchange duration
    pub static ref REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "tapwire_request_duration_ms",
        "Exchange duration from receipt to response in milliseconds",
        &["method", "mode"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Requests denied by the token bucket
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "tapwire_rate_limited_total",
        "Requests rejected by admission control"
    )
    .unwrap();

    /// OpenAPI validation failures by phase
    pub static ref VALIDATION_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "tapwire_validation_failures_total",
        "OpenAPI validation failures",
        &["phase"]  // phase: request|response
    )
    .unwrap();

    /// Exchange records persisted to the store
    pub static ref RECORDS_PERSISTED_TOTAL: CounterVec = register_counter_vec!(
        "tapwire_records_persisted_total",
        "Exchange records written to the store",
        &["result"]  // result: ok|error|timeout
    )
    .unwrap();

    /// Replay lookups
    pub static ref REPLAY_TOTAL: CounterVec = register_counter_vec!(
        "tapwire_replay_total",
        "Replay lookups against the store",
        &["result"]  // result: hit|miss|error
    )
    .unwrap();
}

pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

pub fn observe_duration(method: &str, mode: &str, duration_ms: f64) {
    REQUEST_DURATION_MS
        .with_label_values(&[method, mode])
        .observe(duration_ms);
}

pub fn record_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

pub fn record_validation_failure(phase: &str) {
    VALIDATION_FAILURES_TOTAL.with_label_values(&[phase]).inc();
}

pub fn record_persistence(result: &str) {
    RECORDS_PERSISTED_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_replay(result: &str) {
    REPLAY_TOTAL.with_label_values(&[result]).inc();
}

/// Encode the default registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
