//! Metrics collection and Prometheus exporter for vless-rs.
//!
//! Session counts, authorization outcomes, relayed bytes, outbound routing
//! and persistence failures.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exporter on `listen`.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of TCP connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vless_connections_total";
/// Number of currently active sessions.
pub const CONNECTIONS_ACTIVE: &str = "vless_connections_active";
/// Connections rejected before the upgrade (rate limit, max connections).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vless_connections_rejected_total";
/// Session duration histogram (seconds).
pub const SESSION_DURATION_SECONDS: &str = "vless_session_duration_seconds";
/// Authorization outcomes, labelled `result` ("ok" or a deny reason).
pub const AUTH_RESULTS_TOTAL: &str = "vless_auth_results_total";
/// Sessions ended by the live quota check.
pub const QUOTA_CUTOFFS_TOTAL: &str = "vless_quota_cutoffs_total";
/// Total bytes received from clients.
pub const BYTES_UPLINK_TOTAL: &str = "vless_bytes_uplink_total";
/// Total bytes sent to clients.
pub const BYTES_DOWNLINK_TOTAL: &str = "vless_bytes_downlink_total";
/// Outbound connects, labelled `route` ("direct", "socks5").
pub const OUTBOUND_CONNECTS_TOTAL: &str = "vless_outbound_connects_total";
/// Direct attempts that fell back to SOCKS5.
pub const SOCKS5_FALLBACKS_TOTAL: &str = "vless_socks5_fallbacks_total";
/// Tunneled DNS queries, labelled `result`.
pub const DNS_QUERIES_TOTAL: &str = "vless_dns_queries_total";
/// Usage commits that failed and were dropped.
pub const PERSIST_FAILURES_TOTAL: &str = "vless_persist_failures_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "vless_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

#[inline]
pub fn record_connection_closed(duration_secs: f64) {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(duration_secs);
}

/// Record a rejected connection (reason: "max_connections", "rate_limit").
#[inline]
pub fn record_connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record an authorization outcome ("ok" or a deny reason).
#[inline]
pub fn record_auth_result(result: &'static str) {
    counter!(AUTH_RESULTS_TOTAL, "result" => result).increment(1);
}

#[inline]
pub fn record_quota_cutoff() {
    counter!(QUOTA_CUTOFFS_TOTAL).increment(1);
}

#[inline]
pub fn record_bytes_uplink(bytes: u64) {
    counter!(BYTES_UPLINK_TOTAL).increment(bytes);
}

#[inline]
pub fn record_bytes_downlink(bytes: u64) {
    counter!(BYTES_DOWNLINK_TOTAL).increment(bytes);
}

/// Record a successful outbound connect (route: "direct" or "socks5").
#[inline]
pub fn record_outbound_connect(route: &'static str) {
    counter!(OUTBOUND_CONNECTS_TOTAL, "route" => route).increment(1);
}

#[inline]
pub fn record_socks5_fallback() {
    counter!(SOCKS5_FALLBACKS_TOTAL).increment(1);
}

/// Record a DNS exchange (result: "ok", "error", "timeout").
#[inline]
pub fn record_dns_query(result: &'static str) {
    counter!(DNS_QUERIES_TOTAL, "result" => result).increment(1);
}

#[inline]
pub fn record_persist_failure() {
    counter!(PERSIST_FAILURES_TOTAL).increment(1);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

// ============================================================================
// Error Type Constants (re-exported from vless-core)
// ============================================================================

pub use vless_core::{
    ERROR_AUTH, ERROR_CONFIG, ERROR_CONNECT, ERROR_DNS, ERROR_HANDSHAKE, ERROR_IO, ERROR_PERSIST,
    ERROR_PROTOCOL, ERROR_TIMEOUT,
};
