//! Prometheus metrics for the real IP middleware.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `real_ip_requests_total` - Requests processed (label: `outcome` =
//!   `rewritten` | `unresolved` | `faulted`)
//! - `real_ip_rule_matches_total` - Rewrites per winning rule (label: `rule`, the
//!   rule's position in configuration)
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter, so the
//! middleware can be used as a library without a metrics endpoint.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "real_ip_requests_total";
    pub const RULE_MATCHES_TOTAL: &str = "real_ip_rule_matches_total";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Requests processed by the real IP middleware, by outcome"
    );
    describe_counter!(
        names::RULE_MATCHES_TOTAL,
        "Header rewrites performed, by winning proxy rule"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record the outcome of one request.
pub fn record_outcome(outcome: &'static str) {
    counter!(names::REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a rewrite by the rule at `rule_index`.
pub fn record_rule_match(rule_index: usize) {
    counter!(names::RULE_MATCHES_TOTAL, "rule" => rule_index.to_string()).increment(1);
}
