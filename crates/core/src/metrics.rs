//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (runs, pages, skipped records)
//! - Fetch worker (media and metadata outcomes)
//! - HTTP (provider and source request latency, source attempts, retries)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Orchestrator
// =============================================================================

/// Finished runs by terminal state.
pub static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_runs_total", "Total ingestion runs by terminal state"),
        &["state"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Pages fetched by provider.
pub static PAGES_FETCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_pages_fetched_total", "Total provider pages fetched"),
        &["provider"],
    )
    .unwrap()
});

/// Provider items dropped because they could not be parsed.
pub static RECORDS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_records_skipped_total",
            "Total provider items skipped as malformed",
        ),
        &["provider"],
    )
    .unwrap()
});

/// Retry attempts by operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_retry_attempts_total", "Total retry attempts"),
        &["operation"], // "page_fetch", "source_fetch"
    )
    .unwrap()
});

// =============================================================================
// Fetch Worker
// =============================================================================

/// Media outcomes per record.
pub static MEDIA_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_media_outcomes_total", "Media outcomes per record"),
        &["outcome"], // "already_present", "written", "unavailable"
    )
    .unwrap()
});

/// Metadata outcomes per record.
pub static METADATA_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_metadata_outcomes_total",
            "Metadata outcomes per record",
        ),
        &["outcome"], // "already_present", "written", "unavailable", "no_source"
    )
    .unwrap()
});

// =============================================================================
// HTTP
// =============================================================================

/// Request duration in seconds.
pub static REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("harvester_request_duration_seconds", "Duration of HTTP requests")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["target"], // provider name, "gateway", "direct"
    )
    .unwrap()
});

/// Single source fetch attempts.
pub static SOURCE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_source_attempts_total", "Total source fetch attempts"),
        &["kind", "result"], // kind: "gateway", "direct"; result: "success", "error"
    )
    .unwrap()
});

/// Get all metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(RUNS_TOTAL.clone()),
        Box::new(PAGES_FETCHED.clone()),
        Box::new(RECORDS_SKIPPED.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        // Fetch worker
        Box::new(MEDIA_OUTCOMES.clone()),
        Box::new(METADATA_OUTCOMES.clone()),
        // HTTP
        Box::new(REQUEST_DURATION.clone()),
        Box::new(SOURCE_ATTEMPTS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        PAGES_FETCHED.with_label_values(&["test"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "harvester_pages_fetched_total"));
    }
}
