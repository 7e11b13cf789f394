//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Indexer requests and provider failures
//! - Discovered transactions and party status changes
//! - Tracker queue depths and resolved swaps
//! - Health checks

use crate::error::{WatchtowerError, WatchtowerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

lazy_static! {
    // Indexer metrics
    pub static ref WATCHER_REQUESTS: CounterVec = register_counter_vec!(
        "watchtower_watcher_requests_total",
        "Watcher lookups by currency, operation and outcome",
        &["currency", "operation", "outcome"]
    ).unwrap();

    pub static ref PROVIDER_FAILURES: CounterVec = register_counter_vec!(
        "watchtower_provider_failures_total",
        "Indexer provider failures that triggered a fallback",
        &["currency", "provider"]
    ).unwrap();

    // Swap metrics
    pub static ref TRANSACTIONS_DISCOVERED: CounterVec = register_counter_vec!(
        "watchtower_transactions_discovered_total",
        "Transactions linked to a party",
        &["currency", "kind"]
    ).unwrap();

    pub static ref PARTY_STATUS_CHANGES: CounterVec = register_counter_vec!(
        "watchtower_party_status_total",
        "Party status transitions by target status",
        &["status"]
    ).unwrap();

    pub static ref SWAPS_RESOLVED: CounterVec = register_counter_vec!(
        "watchtower_swaps_resolved_total",
        "Swaps leaving the active set",
        &["outcome"]
    ).unwrap();

    pub static ref SWAP_PASS_LATENCY: HistogramVec = register_histogram_vec!(
        "watchtower_swap_pass_seconds",
        "Duration of one resolution pass over a swap",
        &["mode"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Tracker metrics
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "watchtower_swap_queue_depth",
        "Swaps held per tracker queue",
        &["queue"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "watchtower_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "watchtower_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self, cancel: CancellationToken) -> WatchtowerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| WatchtowerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| WatchtowerError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> WatchtowerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| WatchtowerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| WatchtowerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_watcher_request(currency: &str, operation: &str, outcome: &str) {
    WATCHER_REQUESTS
        .with_label_values(&[currency, operation, outcome])
        .inc();
}

pub fn record_provider_failure(currency: &str, provider: &str) {
    PROVIDER_FAILURES
        .with_label_values(&[currency, provider])
        .inc();
}

pub fn record_transaction_discovered(currency: &str, kind: &str) {
    TRANSACTIONS_DISCOVERED
        .with_label_values(&[currency, kind])
        .inc();
}

pub fn record_party_status(status: &str) {
    PARTY_STATUS_CHANGES.with_label_values(&[status]).inc();
}

pub fn record_swap_resolved(outcome: &str) {
    SWAPS_RESOLVED.with_label_values(&[outcome]).inc();
}

pub fn record_swap_pass(mode: &str, latency_secs: f64) {
    SWAP_PASS_LATENCY
        .with_label_values(&[mode])
        .observe(latency_secs);
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth as f64);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
