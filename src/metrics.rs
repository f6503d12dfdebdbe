//! Prometheus metrics for the aggregation engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter: module calls by module and outcome (ok, transport, status, ...)
    pub static ref MODULE_CALLS: CounterVec = register_counter_vec!(
        "ctxmesh_module_calls_total",
        "Module calls by module and outcome",
        &["module", "outcome"]
    )
    .expect("Failed to create module_calls metric");

    /// Histogram: module call latency (seconds)
    pub static ref MODULE_LATENCY: HistogramVec = register_histogram_vec!(
        "ctxmesh_module_call_duration_seconds",
        "Duration of module calls",
        &["module"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to create module_call_duration metric");

    /// Counter: cache operations (hit/miss/write/error)
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "ctxmesh_cache_operations_total",
        "Cache operations by type",
        &["operation"]
    )
    .expect("Failed to create cache_operations metric");

    /// Counter: aggregations by merge strategy
    pub static ref AGGREGATIONS: CounterVec = register_counter_vec!(
        "ctxmesh_aggregations_total",
        "Aggregations by merge strategy",
        &["strategy"]
    )
    .expect("Failed to create aggregations metric");

    /// Gauge: responding modules in the most recent aggregation
    pub static ref RESPONDING_MODULES: Gauge = register_gauge!(
        "ctxmesh_responding_modules",
        "Responding modules in the most recent aggregation"
    )
    .expect("Failed to create responding_modules metric");
}

/// Record one settled module call
pub fn record_module_call(module: &str, outcome: &str, duration_secs: f64) {
    MODULE_CALLS.with_label_values(&[module, outcome]).inc();
    MODULE_LATENCY
        .with_label_values(&[module])
        .observe(duration_secs);
}

/// Record cache hit
pub fn record_cache_hit() {
    CACHE_OPERATIONS.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CACHE_OPERATIONS.with_label_values(&["miss"]).inc();
}

/// Record cache write
pub fn record_cache_write() {
    CACHE_OPERATIONS.with_label_values(&["write"]).inc();
}

/// Record a cache store failure
pub fn record_cache_error() {
    CACHE_OPERATIONS.with_label_values(&["error"]).inc();
}

/// Record a completed aggregation
pub fn record_aggregation(strategy: &str, responding: usize) {
    AGGREGATIONS.with_label_values(&[strategy]).inc();
    RESPONDING_MODULES.set(responding as f64);
}

/// Gather all metrics in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
