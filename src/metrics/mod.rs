//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Quote and settlement throughput and latency
//! - RPC endpoint failovers
//! - Chain connectivity

use crate::error::{RebalancerError, RebalancerResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, CounterVec, Encoder, GaugeVec,
    Histogram, HistogramTimer, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "rebalancer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref ENDPOINT_FAILOVERS: CounterVec = register_counter_vec!(
        "rebalancer_rpc_endpoint_failovers_total",
        "RPC calls that rotated away from a failing endpoint",
        &["chain_id"]
    ).unwrap();

    // Quote metrics
    pub static ref QUOTES: CounterVec = register_counter_vec!(
        "rebalancer_quotes_total",
        "Quotes served by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref QUOTE_LATENCY: Histogram = register_histogram!(
        "rebalancer_quote_latency_seconds",
        "Quote request latency",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Settlement metrics
    pub static ref SETTLEMENTS: CounterVec = register_counter_vec!(
        "rebalancer_settlements_total",
        "Settlements served by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref SETTLEMENTS_SUBMITTED: CounterVec = register_counter_vec!(
        "rebalancer_settlements_submitted_total",
        "Settlement transactions submitted per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref SETTLEMENT_LATENCY: Histogram = register_histogram!(
        "rebalancer_settlement_latency_seconds",
        "Settlement request latency",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
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

    pub async fn run(&self) -> RebalancerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RebalancerError::Config(format!("cannot bind metrics server: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RebalancerError::Config(format!("metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_endpoint_failover(chain_id: u64) {
    ENDPOINT_FAILOVERS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_quote(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    QUOTES.with_label_values(&[outcome]).inc();
}

pub fn quote_timer() -> HistogramTimer {
    QUOTE_LATENCY.start_timer()
}

pub fn record_settlement(success: bool) {
    let outcome = if success { "ok" } else { "error" };
    SETTLEMENTS.with_label_values(&[outcome]).inc();
}

pub fn record_settlement_submitted(chain_id: u64) {
    SETTLEMENTS_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn settlement_timer() -> HistogramTimer {
    SETTLEMENT_LATENCY.start_timer()
}
