//! Prometheus metrics for the stash server.
//!
//! Exposes counters for node writes, archive exports and preauth redemption.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no node ids, attribute values or tokens, but they do expose
//! aggregate usage. Restrict the endpoint to scraper addresses at the network
//! level, or disable it with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Node metrics
pub static NODES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("stash_nodes_created_total", "Total number of nodes created")
        .expect("metric creation failed")
});

pub static NODES_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stash_nodes_deleted_total",
        "Total number of nodes deleted through the API",
    )
    .expect("metric creation failed")
});

pub static NODES_REAPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stash_nodes_reaped_total",
        "Total number of expired nodes removed by the reaper",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stash_bytes_uploaded_total",
        "Total decompressed bytes stored by uploads",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stash_upload_duration_seconds",
            "Time taken to receive, decode and store an upload",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("stash_upload_errors_total", "Total upload errors by error type"),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Archive and preauth metrics
pub static ARCHIVES_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("stash_archives_created_total", "Total archive jobs created"),
        &["format"],
    )
    .expect("metric creation failed")
});

pub static ARCHIVE_FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stash_archive_fetches_total",
            "Total archive streams started from a redeemed preauth token",
        ),
        &["format"],
    )
    .expect("metric creation failed")
});

pub static PREAUTH_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stash_preauth_rejections_total",
            "Total preauth redemptions refused, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(NODES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(NODES_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(NODES_REAPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARCHIVES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARCHIVE_FETCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PREAUTH_REJECTIONS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
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

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
