//! Prometheus metrics for the tessera server.
//!
//! Covers chunk ingestion, deduplication, and the completion pipeline.
//! Labels never carry file IDs or hashes.
//!
//! The `/metrics` endpoint is unauthenticated; restrict it to scraper
//! addresses at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static FILES_REGISTERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_files_registered_total",
        "Total number of files registered",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunks_stored_total",
        "Total number of chunk rows committed",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunks_deduplicated_total",
        "Chunk uploads rejected as duplicates of an existing row",
    )
    .expect("metric creation failed")
});

pub static BLOBS_REUSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_blobs_reused_total",
        "Chunk commits whose payload was already in storage",
    )
    .expect("metric creation failed")
});

pub static BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_bytes_stored_total",
        "Total payload bytes written to storage (new blobs only)",
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tessera_chunk_upload_duration_seconds",
            "Time taken to ingest a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_upload_errors_total",
            "Total rejected chunk uploads by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Completion metrics
pub static FILES_FINALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_files_finalized_total",
        "Files that reached the finished state",
    )
    .expect("metric creation failed")
});

pub static FINALIZE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_finalize_failures_total",
        "Finalize runs that failed or timed out, leaving the file in processing",
    )
    .expect("metric creation failed")
});

pub static FINALIZE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tessera_finalize_duration_seconds",
            "Time taken by a finalize run",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]),
    )
    .expect("metric creation failed")
});

pub static FILES_RECOVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_files_recovered_total",
        "Stuck files finished by the recovery sweep",
    )
    .expect("metric creation failed")
});

pub static FILES_STUCK: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tessera_files_stuck",
        "Stale processing files seen by the last recovery sweep",
    )
    .expect("metric creation failed")
});

pub static SESSION_SUBSCRIBERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tessera_session_subscribers",
        "Connected completion-event subscribers",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(FILES_REGISTERED.clone()),
            Box::new(CHUNKS_STORED.clone()),
            Box::new(CHUNKS_DEDUPLICATED.clone()),
            Box::new(BLOBS_REUSED.clone()),
            Box::new(BYTES_STORED.clone()),
            Box::new(CHUNK_UPLOAD_DURATION.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(FILES_FINALIZED.clone()),
            Box::new(FINALIZE_FAILURES.clone()),
            Box::new(FINALIZE_DURATION.clone()),
            Box::new(FILES_RECOVERED.clone()),
            Box::new(FILES_STUCK.clone()),
            Box::new(SESSION_SUBSCRIBERS.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a rejected chunk upload by error type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        record_upload_error("hash_mismatch");

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("tessera_upload_errors_total"));
    }
}
