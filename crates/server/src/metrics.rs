//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the contentflow server:
//! - HTTP request metrics (latency, counts)
//! - Batch and keyword-wait status (collected dynamically)
//! - Everything registered by the core crate (tasks, stages, gateway, callbacks)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "contentflow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0, 300.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("contentflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "contentflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Batches with unfinished tasks (collected dynamically).
pub static BATCHES_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("contentflow_batches_running", "Batches still running").unwrap()
});

/// Tasks waiting for a concurrency permit (collected dynamically).
pub static PERMITS_WAITING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "contentflow_permits_waiting",
        "Tasks waiting for a concurrency permit",
    )
    .unwrap()
});

/// Tags with at least one task waiting for keywords (collected dynamically).
pub static KEYWORD_TAGS_WAITING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "contentflow_keyword_tags_waiting",
        "Tags with tasks waiting for generated keywords",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Orchestrator
    registry
        .register(Box::new(BATCHES_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(PERMITS_WAITING.clone()))
        .unwrap();
    registry
        .register(Box::new(KEYWORD_TAGS_WAITING.clone()))
        .unwrap();

    // Core metrics (tasks, stages, gateway, callbacks)
    for metric in contentflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the orchestrator right now.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let orchestrator = state.orchestrator();
    let status = orchestrator.status().await;
    BATCHES_RUNNING.set(status.running_batches as i64);
    PERMITS_WAITING.set(status.limiter.waiting as i64);
    KEYWORD_TAGS_WAITING.set(orchestrator.notifier().waiting_tags().len() as i64);
}
