//! Configuration type definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent sessions (0 = unlimited).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_tcp_idle_timeout_secs")]
    pub tcp_idle_timeout_secs: u64,
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Upper bound on bytes buffered while waiting for a complete header.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    #[serde(default = "default_header_timeout_secs")]
    pub header_timeout_secs: u64,
    /// How often long sessions commit their usage delta.
    #[serde(default = "default_usage_flush_interval_secs")]
    pub usage_flush_interval_secs: u64,
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
    #[serde(default = "default_tcp_no_delay")]
    pub no_delay: bool,
    /// Seconds to wait for in-flight sessions on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Per-IP connection throttling. Absent disables it.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            tcp_idle_timeout_secs: default_tcp_idle_timeout_secs(),
            relay_buffer_size: default_relay_buffer_size(),
            max_header_bytes: default_max_header_bytes(),
            header_timeout_secs: default_header_timeout_secs(),
            usage_flush_interval_secs: default_usage_flush_interval_secs(),
            connection_backlog: default_connection_backlog(),
            no_delay: default_tcp_no_delay(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            rate_limit: None,
        }
    }
}

/// Rate limiting configuration for per-IP connection throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum new connections per IP within the time window.
    #[serde(default = "default_rate_limit_max_connections")]
    pub max_connections_per_ip: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    /// Cleanup interval in seconds for expired entries.
    #[serde(default = "default_rate_limit_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: default_rate_limit_max_connections(),
            window_secs: default_rate_limit_window_secs(),
            cleanup_interval_secs: default_rate_limit_cleanup_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Required `Host` header value. Any host is accepted when unset.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ws_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Header carrying the real client address when running behind a
    /// trusted proxy, e.g. `CF-Connecting-IP` or `X-Forwarded-For`.
    #[serde(default)]
    pub client_ip_header: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            host: None,
            max_frame_bytes: default_ws_max_frame_bytes(),
            client_ip_header: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// SOCKS5 upstream used as fallback (or exclusively when forced).
    #[serde(default)]
    pub socks5: Option<Socks5Config>,
    /// Skip the direct attempt for every destination.
    #[serde(default)]
    pub force_socks5: bool,
    /// Destinations always routed through SOCKS5 (`*.example.com`, exact hosts).
    #[serde(default)]
    pub socks5_hosts: Vec<String>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            socks5: None,
            force_socks5: false,
            socks5_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Socks5Config {
    /// `host:port` of the SOCKS5 server.
    pub address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// `udp://ip:port` or an `https://` DNS-over-HTTPS endpoint.
    #[serde(default = "default_dns_upstream")]
    pub upstream: String,
    #[serde(default = "default_dns_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            upstream: default_dns_upstream(),
            timeout_secs: default_dns_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static users served from memory when no database is configured.
    #[serde(default)]
    pub users: Vec<UserConfig>,
    /// SQL store URL (`sqlite:`, `postgres://`, `mysql://`).
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_user_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_ip_entry_ttl_secs")]
    pub ip_entry_ttl_secs: u64,
    #[serde(default = "default_ip_set_ttl_secs")]
    pub ip_set_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            database: None,
            cache_ttl_secs: default_user_cache_ttl_secs(),
            ip_entry_ttl_secs: default_ip_entry_ttl_secs(),
            ip_set_ttl_secs: default_ip_set_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,
    /// `YYYY-MM-DD` (UTC).
    #[serde(default)]
    pub expiration_date: Option<String>,
    /// `HH:MM:SS` (UTC).
    #[serde(default)]
    pub expiration_time: Option<String>,
    /// Bytes; 0 means unlimited.
    #[serde(default)]
    pub data_cap: u64,
    /// Concurrent client addresses; 0 means unlimited.
    #[serde(default)]
    pub ip_limit: u32,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Prometheus exporter listen address. Disabled when unset.
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"vless_auth": "debug"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}
