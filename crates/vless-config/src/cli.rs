//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;
use crate::types::{RateLimitConfig, Socks5Config};

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override server listen address, e.g. 0.0.0.0:8080
    #[arg(long, env = "VLESS_LISTEN")]
    pub listen: Option<String>,
    /// Override WebSocket path
    #[arg(long)]
    pub ws_path: Option<String>,
    /// Override required WebSocket Host header
    #[arg(long)]
    pub ws_host: Option<String>,
    /// Trusted header carrying the real client address
    #[arg(long)]
    pub client_ip_header: Option<String>,
    /// Override SQL store URL
    #[arg(long, env = "DATABASE_URL")]
    pub database: Option<String>,
    /// Override TCP idle timeout (seconds)
    #[arg(long)]
    pub tcp_idle_timeout_secs: Option<u64>,
    /// Override maximum protocol header bytes
    #[arg(long)]
    pub max_header_bytes: Option<usize>,
    /// Override maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Override usage flush interval (seconds)
    #[arg(long)]
    pub usage_flush_interval_secs: Option<u64>,
    /// Override outbound connect timeout (seconds)
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,
    /// SOCKS5 upstream address, e.g. 127.0.0.1:1080
    #[arg(long, env = "VLESS_SOCKS5")]
    pub socks5: Option<String>,
    /// Route every destination through SOCKS5
    #[arg(long)]
    pub force_socks5: Option<bool>,
    /// Override DNS upstream (udp://ip:port or https://...)
    #[arg(long)]
    pub dns_upstream: Option<String>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long, env = "VLESS_LOG_LEVEL")]
    pub log_level: Option<String>,
    /// Override log format (json/pretty/compact)
    #[arg(long)]
    pub log_format: Option<String>,
    /// Enable rate limiting with max connections per IP (0 = disabled)
    #[arg(long)]
    pub rate_limit_max_per_ip: Option<u32>,
    /// Rate limit time window in seconds
    #[arg(long)]
    pub rate_limit_window_secs: Option<u64>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.server.listen = v.clone();
    }
    if let Some(v) = &overrides.ws_path {
        config.websocket.path = v.clone();
    }
    if let Some(v) = &overrides.ws_host {
        config.websocket.host = Some(v.clone());
    }
    if let Some(v) = &overrides.client_ip_header {
        config.websocket.client_ip_header = Some(v.clone());
    }
    if let Some(v) = &overrides.database {
        config.auth.database = Some(v.clone());
    }
    if let Some(v) = overrides.tcp_idle_timeout_secs {
        config.server.tcp_idle_timeout_secs = v;
    }
    if let Some(v) = overrides.max_header_bytes {
        config.server.max_header_bytes = v;
    }
    if let Some(v) = overrides.max_connections {
        config.server.max_connections = v;
    }
    if let Some(v) = overrides.usage_flush_interval_secs {
        config.server.usage_flush_interval_secs = v;
    }
    if let Some(v) = overrides.connect_timeout_secs {
        config.outbound.connect_timeout_secs = v;
    }
    if let Some(v) = &overrides.socks5 {
        match config.outbound.socks5.as_mut() {
            Some(s) => s.address = v.clone(),
            None => {
                config.outbound.socks5 = Some(Socks5Config {
                    address: v.clone(),
                    username: None,
                    password: None,
                })
            }
        }
    }
    if let Some(v) = overrides.force_socks5 {
        config.outbound.force_socks5 = v;
    }
    if let Some(v) = &overrides.dns_upstream {
        config.dns.upstream = v.clone();
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if let Some(v) = &overrides.log_format {
        config.logging.format = Some(v.clone());
    }
    // 0 disables, > 0 enables with that limit
    if let Some(max) = overrides.rate_limit_max_per_ip {
        if max == 0 {
            config.server.rate_limit = None;
        } else {
            config
                .server
                .rate_limit
                .get_or_insert_with(RateLimitConfig::default)
                .max_connections_per_ip = max;
        }
    }
    if let Some(window) = overrides.rate_limit_window_secs
        && let Some(ref mut rl) = config.server.rate_limit
    {
        rl.window_secs = window;
    }
}
