//! Metrics module for course-service.
//! Provides Prometheus metrics for order, subscription and progress operations.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Store operation duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "course_db_query_duration_seconds",
            "Store operation duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Recorder behind the `metrics` macros used by the HTTP middleware.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Order status transitions counter
pub static ORDER_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription operations counter
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Progress reports counter by merge outcome
pub static PROGRESS_REPORTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Retried transactions counter
pub static TRANSACTION_RETRIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    });

    ORDER_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "course_order_transitions_total",
                "Total order transitions by kind"
            ),
            &["transition"]
        )
        .expect("Failed to register ORDER_TRANSITIONS_TOTAL")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "course_subscription_operations_total",
                "Total subscription operations by type"
            ),
            &["operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    PROGRESS_REPORTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "course_progress_reports_total",
                "Total progress reports by merge outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register PROGRESS_REPORTS_TOTAL")
    });

    TRANSACTION_RETRIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "course_transaction_retries_total",
                "Total transaction retries after a conflict"
            ),
            &["operation"]
        )
        .expect("Failed to register TRANSACTION_RETRIES_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("course_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    let mut output = String::from_utf8(buffer).unwrap_or_default();
    if let Some(handle) = METRICS_HANDLE.get() {
        output.push_str(&handle.render());
    }
    output
}

pub fn record_order_transition(transition: &str) {
    if let Some(counter) = ORDER_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[transition]).inc();
    }
}

pub fn record_subscription_operation(operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

pub fn record_progress_report(outcome: &str) {
    if let Some(counter) = PROGRESS_REPORTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_transaction_retry(operation: &str) {
    if let Some(counter) = TRANSACTION_RETRIES_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
