//! Prometheus metrics for the bucket engine
//!
//! Counters cover measurement placement, bucket lifecycle, granularity
//! changes and persistence. Metrics are registered in the default registry
//! on first use; `gather_metrics` renders them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Placement ===

    /// Measurements placed, by outcome (joined / created)
    pub static ref BUCKET_INSERTS_TOTAL: CounterVec = register_counter_vec!(
        "kuba_buckets_bucket_inserts_total",
        "Total measurements placed into buckets",
        &["outcome"]
    ).unwrap();

    /// Buckets opened
    pub static ref BUCKETS_OPENED_TOTAL: Counter = register_counter!(
        "kuba_buckets_buckets_opened_total",
        "Total buckets opened"
    ).unwrap();

    /// Buckets closed, by reason
    pub static ref BUCKETS_CLOSED_TOTAL: CounterVec = register_counter_vec!(
        "kuba_buckets_buckets_closed_total",
        "Total buckets closed by reason",
        &["reason"]
    ).unwrap();

    // === Configuration ===

    /// Granularity change requests, by result (upgraded / unchanged / rejected)
    pub static ref GRANULARITY_CHANGES_TOTAL: CounterVec = register_counter_vec!(
        "kuba_buckets_granularity_changes_total",
        "Total granularity change requests by result",
        &["result"]
    ).unwrap();

    // === Persistence ===

    /// Persisted buckets, by status
    pub static ref PERSISTS_TOTAL: CounterVec = register_counter_vec!(
        "kuba_buckets_persists_total",
        "Total bucket persistence attempts",
        &["status"]
    ).unwrap();

    /// Persistence failures
    pub static ref PERSISTENCE_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "kuba_buckets_persistence_failures_total",
        "Total bucket persistence failures",
        &["stage"]
    ).unwrap();

    /// Bucket write latency
    pub static ref PERSIST_DURATION: HistogramVec = register_histogram_vec!(
        "kuba_buckets_persist_duration_seconds",
        "Bucket write latency in seconds",
        &["status"],
        vec![0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();

    // === Errors ===

    /// Total errors by type
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "kuba_buckets_errors_total",
        "Total errors by type and operation",
        &["error_type", "operation"]
    ).unwrap();
}

/// Initialize metrics system
///
/// Registers every metric up front so a scrape lists them before first use.
pub fn init() {
    lazy_static::initialize(&BUCKET_INSERTS_TOTAL);
    lazy_static::initialize(&BUCKETS_OPENED_TOTAL);
    lazy_static::initialize(&BUCKETS_CLOSED_TOTAL);
    lazy_static::initialize(&GRANULARITY_CHANGES_TOTAL);
    lazy_static::initialize(&PERSISTS_TOTAL);
    lazy_static::initialize(&PERSISTENCE_FAILURES_TOTAL);
    lazy_static::initialize(&PERSIST_DURATION);
    lazy_static::initialize(&ERRORS_TOTAL);
    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a placed measurement
#[inline]
pub fn record_insert(outcome: &str) {
    BUCKET_INSERTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a newly opened bucket
#[inline]
pub fn record_bucket_opened() {
    BUCKETS_OPENED_TOTAL.inc();
}

/// Record a closed bucket
#[inline]
pub fn record_bucket_closed(reason: &str) {
    BUCKETS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
}

/// Record the result of a granularity change request
#[inline]
pub fn record_granularity_change(result: &str) {
    GRANULARITY_CHANGES_TOTAL.with_label_values(&[result]).inc();
}

/// Record a bucket write
#[inline]
pub fn record_persist(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    PERSISTS_TOTAL.with_label_values(&[status]).inc();
    PERSIST_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);

    if !success {
        PERSISTENCE_FAILURES_TOTAL.with_label_values(&["write"]).inc();
    }
}

/// Record an error
#[inline]
pub fn record_error(error_type: &str, operation: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, operation])
        .inc();
    if operation == "persist" {
        PERSISTENCE_FAILURES_TOTAL
            .with_label_values(&[error_type])
            .inc();
    }
}
