//! Metrics collection and exposition.
//!
//! # Metrics
//! - `circuit_breaker_state_changes_total` (counter): transitions by subgraph, feature flag, state
//! - `circuit_breaker_open` (gauge): 1=open, 0=closed
//! - `circuit_breaker_short_circuits_total` (counter): calls denied by an open breaker
//! - `subgraph_retries_total` (counter): retries by subgraph
//! - `operation_cache_lookups_total` (counter): lookups by tier, scope, result
//! - `cache_warmup_items_total` (counter): warmup items by result
//! - `operation_estimated_cost` (histogram): estimated plan cost
//!
//! # Design Decisions
//! - Uses the `metrics` facade; recording is a no-op until a recorder is installed
//! - Prometheus exporter only when enabled in configuration

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn flag_label(feature_flag: Option<&str>) -> String {
    feature_flag.unwrap_or("").to_string()
}

pub fn record_breaker_transition(subgraph: &str, feature_flag: Option<&str>, is_open: bool) {
    let state = if is_open { "open" } else { "closed" };
    counter!(
        "circuit_breaker_state_changes_total",
        "subgraph" => subgraph.to_string(),
        "feature_flag" => flag_label(feature_flag),
        "state" => state
    )
    .increment(1);
    gauge!(
        "circuit_breaker_open",
        "subgraph" => subgraph.to_string(),
        "feature_flag" => flag_label(feature_flag)
    )
    .set(if is_open { 1.0 } else { 0.0 });
}

pub fn record_short_circuit(subgraph: &str, feature_flag: Option<&str>) {
    counter!(
        "circuit_breaker_short_circuits_total",
        "subgraph" => subgraph.to_string(),
        "feature_flag" => flag_label(feature_flag)
    )
    .increment(1);
}

pub fn record_retry(subgraph: &str) {
    counter!("subgraph_retries_total", "subgraph" => subgraph.to_string()).increment(1);
}

pub fn record_cache_lookup(tier: &'static str, feature_flag: Option<&str>, hit: bool) {
    counter!(
        "operation_cache_lookups_total",
        "tier" => tier,
        "scope" => feature_flag.unwrap_or("base").to_string(),
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

pub fn record_warmup_item(result: &'static str) {
    counter!("cache_warmup_items_total", "result" => result).increment(1);
}

pub fn record_estimated_cost(cost: u64) {
    histogram!("operation_estimated_cost").record(cost as f64);
}
