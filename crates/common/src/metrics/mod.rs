//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all Recall metrics
pub const METRICS_PREFIX: &str = "recall";

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion metrics
    describe_counter!(
        format!("{}_items_discovered_total", METRICS_PREFIX),
        Unit::Count,
        "Content items discovered and enqueued"
    );

    describe_counter!(
        format!("{}_items_deduplicated_total", METRICS_PREFIX),
        Unit::Count,
        "Content items skipped by the deduplication gate"
    );

    describe_counter!(
        format!("{}_chunks_indexed_total", METRICS_PREFIX),
        Unit::Count,
        "Chunks embedded and upserted into the vector index"
    );

    describe_counter!(
        format!("{}_jobs_retried_total", METRICS_PREFIX),
        Unit::Count,
        "Ingestion job attempts that failed transiently and were re-queued"
    );

    describe_counter!(
        format!("{}_jobs_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Ingestion jobs that settled in a terminal failure"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Content item processing latency in seconds"
    );

    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval queries by outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Query pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_fallback_invocations_total", METRICS_PREFIX),
        Unit::Count,
        "Web search fallback invocations"
    );
}

/// Record a discovered item
pub fn record_item_discovered(source_kind: &str) {
    counter!(
        format!("{}_items_discovered_total", METRICS_PREFIX),
        "source_kind" => source_kind.to_string()
    )
    .increment(1);
}

/// Record an item skipped by the dedup gate
pub fn record_item_deduplicated(source_kind: &str) {
    counter!(
        format!("{}_items_deduplicated_total", METRICS_PREFIX),
        "source_kind" => source_kind.to_string()
    )
    .increment(1);
}

/// Record chunks upserted into the index
pub fn record_chunks_indexed(count: usize) {
    counter!(format!("{}_chunks_indexed_total", METRICS_PREFIX)).increment(count as u64);
}

/// Record a retried job attempt
pub fn record_job_retry() {
    counter!(format!("{}_jobs_retried_total", METRICS_PREFIX)).increment(1);
}

/// Record a terminally-failed job
pub fn record_job_failed() {
    counter!(format!("{}_jobs_failed_total", METRICS_PREFIX)).increment(1);
}

/// Record item processing latency
pub fn record_ingestion_duration(seconds: f64) {
    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(seconds);
}

/// Record a query with its outcome and latency
pub fn record_query(outcome: &str, seconds: f64) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(seconds);
}

/// Record a fallback invocation
pub fn record_fallback(available: bool) {
    counter!(
        format!("{}_fallback_invocations_total", METRICS_PREFIX),
        "available" => available.to_string()
    )
    .increment(1);
}
