//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and block height
//! - Deposits received and votes submitted
//! - Transaction failures by class
//! - Gas resolution sources and nonces

use crate::error::{FailureClass, RelayerError, RelayerResult};
use crate::events::TransferType;
use crate::tx::GasSource;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "relayer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["domain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "relayer_chain_block_height",
        "Latest block height seen per domain",
        &["domain_id"]
    ).unwrap();

    // Relay metrics
    pub static ref DEPOSITS_RECEIVED: CounterVec = register_counter_vec!(
        "relayer_deposits_received_total",
        "Total deposits read from source bridges",
        &["domain_id", "transfer_type"]
    ).unwrap();

    pub static ref UNROUTABLE_MESSAGES: CounterVec = register_counter_vec!(
        "relayer_unroutable_messages_total",
        "Messages dropped because no chain serves their destination",
        &["source", "destination"]
    ).unwrap();

    pub static ref VOTES_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_votes_submitted_total",
        "Total proposal votes confirmed",
        &["domain_id", "transfer_type"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_transactions_submitted_total",
        "Total transactions broadcast",
        &["domain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "relayer_transactions_failed_total",
        "Total transactions failed by failure class",
        &["domain_id", "class"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_transaction_latency_seconds",
        "Time from nonce lock to confirmed receipt",
        &["domain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref ACCOUNT_NONCE: GaugeVec = register_gauge_vec!(
        "relayer_account_nonce",
        "Next nonce of the relayer account per domain",
        &["domain_id"]
    ).unwrap();

    pub static ref GAS_RESOLUTION: CounterVec = register_counter_vec!(
        "relayer_gas_resolution_total",
        "Gas values resolved, by value and source",
        &["domain_id", "value", "source"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "relayer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "relayer_health_check_failure_total",
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_chain_health(domain_id: u8, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&domain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_block_height(domain_id: u8, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&domain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_deposit(domain_id: u8, transfer_type: TransferType) {
    DEPOSITS_RECEIVED
        .with_label_values(&[&domain_id.to_string(), transfer_type.name()])
        .inc();
}

pub fn record_unroutable(source: u8, destination: u8) {
    UNROUTABLE_MESSAGES
        .with_label_values(&[&source.to_string(), &destination.to_string()])
        .inc();
}

pub fn record_vote_submitted(domain_id: u8, transfer_type: TransferType) {
    VOTES_SUBMITTED
        .with_label_values(&[&domain_id.to_string(), transfer_type.name()])
        .inc();
}

pub fn record_tx_submitted(domain_id: u8) {
    TX_SUBMITTED
        .with_label_values(&[&domain_id.to_string()])
        .inc();
}

pub fn record_tx_failed(domain_id: u8, class: FailureClass) {
    TX_FAILED
        .with_label_values(&[&domain_id.to_string(), class.as_str()])
        .inc();
}

pub fn record_tx_latency(domain_id: u8, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[&domain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_nonce(domain_id: u8, nonce: U256) {
    ACCOUNT_NONCE
        .with_label_values(&[&domain_id.to_string()])
        .set(nonce.low_u64() as f64);
}

pub fn record_gas_resolution(domain_id: u8, value: &str, source: GasSource) {
    GAS_RESOLUTION
        .with_label_values(&[&domain_id.to_string(), value, source.as_str()])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_labelled_by_class() {
        record_tx_failed(201, FailureClass::PostCommit);
        record_tx_failed(201, FailureClass::PostCommit);

        let count = TX_FAILED
            .with_label_values(&["201", "post_commit"])
            .get();
        assert_eq!(count, 2.0);
    }

    #[test]
    fn test_render_exposes_relayer_metrics() {
        record_deposit(202, TransferType::NonFungible);
        record_gas_resolution(202, "limit", GasSource::Configured);

        let body = render().unwrap();
        assert!(body.contains("relayer_deposits_received_total"));
        assert!(body.contains("transfer_type=\"non_fungible\""));
        assert!(body.contains("source=\"configured\""));
    }
}
