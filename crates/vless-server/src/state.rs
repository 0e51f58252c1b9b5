//! Server state shared across connections.

use std::time::Duration;

use vless_auth::AuthServices;
use vless_config::WebSocketConfig;

use crate::dns::DnsResolver;
use crate::outbound::Outbound;

/// Shared server state for all connections.
pub struct ServerState {
    pub auth: AuthServices,
    pub outbound: Outbound,
    pub dns: DnsResolver,
    pub websocket: WebSocketConfig,
    pub max_header_bytes: usize,
    pub header_timeout: Duration,
    pub tcp_idle_timeout: Duration,
    pub relay_buffer_size: usize,
    pub usage_flush_interval: Duration,
    /// How often a live session re-registers its client address. Kept well
    /// under the active-address entry TTL.
    pub ip_renew_interval: Duration,
}

impl ServerState {
    /// Renewal period for an active-address entry lasting `entry_ttl`.
    pub fn renew_interval_for(entry_ttl: Duration) -> Duration {
        (entry_ttl / 2).max(Duration::from_secs(1))
    }
}

#[cfg(test)]
impl ServerState {
    /// State with default timeouts around `auth`; no network is touched.
    pub(crate) fn for_tests(auth: AuthServices) -> Self {
        use vless_config::OutboundConfig;

        Self {
            auth,
            outbound: Outbound::from_config(&OutboundConfig::default(), true),
            dns: DnsResolver::Udp {
                server: std::net::SocketAddr::from(([127, 0, 0, 1], 53)),
                timeout: Duration::from_secs(1),
            },
            websocket: WebSocketConfig::default(),
            max_header_bytes: 8192,
            header_timeout: Duration::from_secs(10),
            tcp_idle_timeout: Duration::from_secs(300),
            relay_buffer_size: 16 * 1024,
            usage_flush_interval: Duration::from_secs(60),
            ip_renew_interval: Duration::from_secs(30),
        }
    }
}
