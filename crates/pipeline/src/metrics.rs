//! Pipeline metrics using the native Prometheus client.
//!
//! Metrics are domain-specific rather than generic event counters. Use
//! traces for event-level granularity during investigations.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific metrics for pipeline monitoring.
pub struct Metrics {
    // === Drain ===
    /// Records drained from the converter stream.
    pub records_drained: Counter,
    /// Current pending-buffer length.
    pub buffer_len: Gauge,

    // === Finalization ===
    /// Records persisted to the durable log.
    pub records_finalized: Counter,
    /// Last finalized height.
    pub finalized_height: Gauge,

    // === Requests ===
    /// Outstanding `get_transactions` requests.
    pub pending_requests: Gauge,
    /// Requests completed with data.
    pub requests_completed: Counter,
    /// Requests completed with an error (canceled, superseded, failed).
    pub requests_failed: Counter,

    // === Sessions ===
    /// Converter rebases (initial session included).
    pub rebases: Counter,
    /// Converter stream failures (errors, premature closes, protocol
    /// violations).
    pub converter_failures: Counter,
}

impl Metrics {
    fn new() -> Self {
        Self {
            records_drained: register_counter!(
                "blockflow_records_drained_total",
                "Records drained from the converter stream"
            )
            .unwrap(),

            buffer_len: register_gauge!(
                "blockflow_buffer_len",
                "Current pending-buffer length"
            )
            .unwrap(),

            records_finalized: register_counter!(
                "blockflow_records_finalized_total",
                "Records persisted to the durable log"
            )
            .unwrap(),

            finalized_height: register_gauge!(
                "blockflow_finalized_height",
                "Last finalized height"
            )
            .unwrap(),

            pending_requests: register_gauge!(
                "blockflow_pending_requests",
                "Outstanding get_transactions requests"
            )
            .unwrap(),

            requests_completed: register_counter!(
                "blockflow_requests_completed_total",
                "Requests completed with data"
            )
            .unwrap(),

            requests_failed: register_counter!(
                "blockflow_requests_failed_total",
                "Requests completed with an error"
            )
            .unwrap(),

            rebases: register_counter!(
                "blockflow_rebases_total",
                "Converter sessions opened"
            )
            .unwrap(),

            converter_failures: register_counter!(
                "blockflow_converter_failures_total",
                "Converter stream failures"
            )
            .unwrap(),
        }
    }
}

/// Get the global metrics instance, registering it on first use.
fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Record a drained record and the resulting buffer length.
pub fn record_drained(buffer_len: usize) {
    let m = metrics();
    m.records_drained.inc();
    m.buffer_len.set(buffer_len as f64);
}

/// Record a finalization step.
pub fn record_finalized(count: usize, height: i64, buffer_len: usize) {
    let m = metrics();
    m.records_finalized.inc_by(count as f64);
    m.finalized_height.set(height as f64);
    m.buffer_len.set(buffer_len as f64);
}

/// Update the outstanding-request gauge.
pub fn set_pending_requests(count: usize) {
    metrics().pending_requests.set(count as f64);
}

/// Record requests completed with data.
pub fn record_requests_completed(count: usize) {
    metrics().requests_completed.inc_by(count as f64);
}

/// Record requests completed with an error.
pub fn record_requests_failed(count: usize) {
    metrics().requests_failed.inc_by(count as f64);
}

/// Record a converter session being opened.
pub fn record_rebase() {
    metrics().rebases.inc();
}

/// Record a converter stream failure.
pub fn record_converter_failure() {
    metrics().converter_failures.inc();
}
