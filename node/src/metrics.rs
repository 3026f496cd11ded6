//! # Prometheus Metrics
//!
//! Node-level gauges layered on top of the registry the protocol crate
//! already fills with consensus counters. `/metrics` renders the whole
//! registry in the Prometheus text format.
//!
//! Gauges are sampled from the [`Node`] on each scrape rather than pushed,
//! so nothing in the protocol crate has to know they exist.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use cerera_protocol::Node;

use crate::api::AppState;

/// Gauge handles registered in the node's registry.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub block_height: IntGauge,
    pub mempool_size: IntGauge,
    pub connected_peers: IntGauge,
    pub validators: IntGauge,
    pub accounts: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl NodeMetrics {
    /// Registers the node gauges. Fails if called twice on one registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            registry: registry.clone(),
            block_height: gauge(registry, "block_height", "Height of the chain tip")?,
            mempool_size: gauge(
                registry,
                "mempool_size",
                "Pending transactions waiting for consensus",
            )?,
            connected_peers: gauge(
                registry,
                "connected_peers",
                "Peers with an outgoing queue",
            )?,
            validators: gauge(registry, "validator_set_size", "Size of the validator set")?,
            accounts: gauge(registry, "vault_accounts", "Accounts in the vault")?,
        })
    }

    /// Samples every gauge from the node.
    pub fn refresh(&self, node: &Node) {
        self.block_height
            .set(node.chain().latest_block().height() as i64);
        self.mempool_size.set(node.mempool().size() as i64);
        self.connected_peers
            .set(node.transport().peer_count() as i64);
        self.validators.set(node.driver().validators().size() as i64);
        self.accounts.set(node.vault().count() as i64);
    }

    /// Encodes the whole registry into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// `GET /metrics`.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.refresh(&state.node);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_fails_cleanly() {
        let registry = Registry::new();
        assert!(NodeMetrics::new(&registry).is_ok());
        assert!(NodeMetrics::new(&registry).is_err());
    }

    #[test]
    fn encode_renders_registered_gauges() {
        let registry = Registry::new();
        let metrics = NodeMetrics::new(&registry).unwrap();
        metrics.block_height.set(7);
        let text = metrics.encode().unwrap();
        assert!(text.contains("block_height 7"));
        assert!(text.contains("# HELP vault_accounts"));
    }
}
