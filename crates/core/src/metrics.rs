//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipeline tasks (outcomes, stage durations, keyword waits)
//! - Outbound gateway calls (attempts, retries)
//! - Callback delivery
//! - Concurrency permits

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Tasks reaching a final outcome.
pub static TASKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("contentflow_tasks_total", "Tasks by final outcome"),
        &["outcome"], // "done", "failed", "cancelled"
    )
    .unwrap()
});

/// Stage execution duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "contentflow_stage_duration_seconds",
            "Duration of a single pipeline stage",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["stage", "result"],
    )
    .unwrap()
});

/// How deferred keyword lookups were resolved.
pub static KEYWORD_WAITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "contentflow_keyword_waits_total",
            "Deferred keyword lookups by resolution source",
        ),
        &["resolved_by"], // "poll", "notification", "timeout"
    )
    .unwrap()
});

/// Permits currently held by running tasks.
pub static PERMITS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "contentflow_permits_in_flight",
        "Concurrency permits currently held",
    )
    .unwrap()
});

// =============================================================================
// Gateway Metrics
// =============================================================================

/// Individual outbound attempts by result.
pub static GATEWAY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "contentflow_gateway_attempts_total",
            "Outbound HTTP attempts by result",
        ),
        &["result"], // "ok", "timeout", "connection", "http_status", "malformed_response"
    )
    .unwrap()
});

/// Retries scheduled after a transient failure.
pub static GATEWAY_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "contentflow_gateway_retries_total",
        "Outbound HTTP retries after transient failures",
    )
    .unwrap()
});

// =============================================================================
// Delivery Metrics
// =============================================================================

/// Callback deliveries by outcome.
pub static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "contentflow_deliveries_total",
            "Callback envelope deliveries by outcome",
        ),
        &["outcome"], // "delivered", "failed", "skipped", "duplicate"
    )
    .unwrap()
});

// =============================================================================
// Audit Metrics
// =============================================================================

/// Audit records by what the writer did with them.
pub static AUDIT_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "contentflow_audit_records_total",
            "Audit records handled by the writer",
        ),
        &["outcome"], // "written", "dropped"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_TOTAL.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(KEYWORD_WAITS.clone()),
        Box::new(PERMITS_IN_FLIGHT.clone()),
        Box::new(GATEWAY_ATTEMPTS.clone()),
        Box::new(GATEWAY_RETRIES.clone()),
        Box::new(DELIVERIES_TOTAL.clone()),
        Box::new(AUDIT_RECORDS_TOTAL.clone()),
    ]
}
