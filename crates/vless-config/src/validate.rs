//! Configuration validation logic.

use std::net::SocketAddr;

use crate::Config;
use crate::defaults::min_header_bytes;
use crate::loader::ConfigError;

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if config.server.tcp_idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.tcp_idle_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.header_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.header_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.usage_flush_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "server.usage_flush_interval_secs must be > 0".into(),
        ));
    }
    if config.server.max_header_bytes < min_header_bytes() {
        return Err(ConfigError::Validation(format!(
            "server.max_header_bytes too small (min {})",
            min_header_bytes()
        )));
    }
    if config.server.relay_buffer_size < 1024 || config.server.relay_buffer_size > 1024 * 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be 1KB..=1MB".into(),
        ));
    }
    if config.server.connection_backlog == 0 {
        return Err(ConfigError::Validation(
            "server.connection_backlog must be > 0".into(),
        ));
    }
    if let Some(ref rl) = config.server.rate_limit {
        if rl.max_connections_per_ip == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.max_connections_per_ip must be > 0".into(),
            ));
        }
        if rl.window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.window_secs must be > 0".into(),
            ));
        }
    }

    if !config.websocket.path.starts_with('/') {
        return Err(ConfigError::Validation(
            "websocket.path must start with '/'".into(),
        ));
    }
    if config.websocket.max_frame_bytes < 1024 {
        return Err(ConfigError::Validation(
            "websocket.max_frame_bytes must be >= 1024".into(),
        ));
    }
    if let Some(h) = &config.websocket.client_ip_header
        && h.trim().is_empty()
    {
        return Err(ConfigError::Validation(
            "websocket.client_ip_header is empty".into(),
        ));
    }

    if config.outbound.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "outbound.connect_timeout_secs must be > 0".into(),
        ));
    }
    match &config.outbound.socks5 {
        Some(s) => {
            if s.address.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "outbound.socks5.address is empty".into(),
                ));
            }
            if s.username.is_some() != s.password.is_some() {
                return Err(ConfigError::Validation(
                    "outbound.socks5 needs both username and password or neither".into(),
                ));
            }
            for (name, v) in [("username", &s.username), ("password", &s.password)] {
                if let Some(v) = v
                    && (v.is_empty() || v.len() > 255)
                {
                    return Err(ConfigError::Validation(format!(
                        "outbound.socks5.{name} must be 1..=255 bytes"
                    )));
                }
            }
        }
        None => {
            if config.outbound.force_socks5 {
                return Err(ConfigError::Validation(
                    "outbound.force_socks5 requires outbound.socks5".into(),
                ));
            }
            if !config.outbound.socks5_hosts.is_empty() {
                return Err(ConfigError::Validation(
                    "outbound.socks5_hosts requires outbound.socks5".into(),
                ));
            }
        }
    }

    validate_dns_upstream(&config.dns.upstream)?;
    if config.dns.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "dns.timeout_secs must be > 0".into(),
        ));
    }

    if config.auth.users.is_empty() && config.auth.database.is_none() {
        return Err(ConfigError::Validation(
            "auth: one of 'users' or 'database' must be set".into(),
        ));
    }
    if !config.auth.users.is_empty() && config.auth.database.is_some() {
        return Err(ConfigError::Validation(
            "auth: 'users' and 'database' are mutually exclusive".into(),
        ));
    }
    for user in &config.auth.users {
        if user.id.trim().is_empty() {
            return Err(ConfigError::Validation("auth.users: empty id".into()));
        }
    }
    if config.auth.cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "auth.cache_ttl_secs must be > 0".into(),
        ));
    }
    if config.auth.ip_entry_ttl_secs == 0 || config.auth.ip_set_ttl_secs < config.auth.ip_entry_ttl_secs
    {
        return Err(ConfigError::Validation(
            "auth.ip_set_ttl_secs must be >= ip_entry_ttl_secs > 0".into(),
        ));
    }

    if let Some(fmt) = &config.logging.format
        && !matches!(fmt.as_str(), "json" | "pretty" | "compact")
    {
        return Err(ConfigError::Validation(
            "logging.format must be json, pretty or compact".into(),
        ));
    }
    if let Some(out) = &config.logging.output
        && !matches!(out.as_str(), "stdout" | "stderr")
    {
        return Err(ConfigError::Validation(
            "logging.output must be stdout or stderr".into(),
        ));
    }
    Ok(())
}

fn validate_dns_upstream(upstream: &str) -> Result<(), ConfigError> {
    if let Some(addr) = upstream.strip_prefix("udp://") {
        addr.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Validation(format!("dns.upstream: invalid address '{addr}'"))
        })?;
        return Ok(());
    }
    if upstream.starts_with("https://") {
        return Ok(());
    }
    Err(ConfigError::Validation(
        "dns.upstream must be udp://ip:port or https://...".into(),
    ))
}
