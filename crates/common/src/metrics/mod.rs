//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the query pipeline and the
//! WebSocket transport with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all WebSift metrics
pub const METRICS_PREFIX: &str = "websift";

/// Buckets for pipeline stage latency (in seconds).
/// Upstream calls dominate, so the range is wide.
pub const STAGE_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total queries by terminal outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    // Rerank metrics
    describe_histogram!(
        format!("{}_rerank_candidates", METRICS_PREFIX),
        Unit::Count,
        "Documents entering the reranker"
    );

    describe_histogram!(
        format!("{}_rerank_kept", METRICS_PREFIX),
        Unit::Count,
        "Documents kept after reranking"
    );

    describe_counter!(
        format!("{}_citations_out_of_range_total", METRICS_PREFIX),
        Unit::Count,
        "Citation markers that do not refer to a source"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Transport metrics
    describe_gauge!(
        format!("{}_ws_connections_active", METRICS_PREFIX),
        Unit::Count,
        "Open WebSocket connections"
    );

    describe_counter!(
        format!("{}_ws_slow_consumers_total", METRICS_PREFIX),
        Unit::Count,
        "Connections closed because the client could not keep up"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a finished query
pub fn record_query(duration_secs: f64, outcome: &'static str) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome
    )
    .record(duration_secs);
}

/// Helper to record a pipeline stage
pub fn record_stage(stage: &'static str, duration_secs: f64) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage
    )
    .record(duration_secs);
}

/// Helper to record reranker selectivity
pub fn record_rerank(candidates: usize, kept: usize) {
    histogram!(format!("{}_rerank_candidates", METRICS_PREFIX)).record(candidates as f64);
    histogram!(format!("{}_rerank_kept", METRICS_PREFIX)).record(kept as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
        tracing::trace!(model, batch_size, duration_secs, "Embedding batch recorded");
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record citations that point past the source list
pub fn record_out_of_range_citations(count: usize) {
    counter!(format!("{}_citations_out_of_range_total", METRICS_PREFIX)).increment(count as u64);
}

/// Helper to track open WebSocket connections
pub fn connection_opened() {
    gauge!(format!("{}_ws_connections_active", METRICS_PREFIX)).increment(1.0);
}

pub fn connection_closed() {
    gauge!(format!("{}_ws_connections_active", METRICS_PREFIX)).decrement(1.0);
}

pub fn record_slow_consumer() {
    counter!(format!("{}_ws_slow_consumers_total", METRICS_PREFIX)).increment(1);
}
