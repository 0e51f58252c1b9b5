//! Default value functions for serde deserialization.
//!
//! These forward to constants in `vless_core::defaults`.

use vless_core::defaults;

macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_max_connections       => DEFAULT_MAX_CONNECTIONS: usize,
    default_tcp_idle_timeout_secs => DEFAULT_TCP_IDLE_TIMEOUT_SECS: u64,
    default_relay_buffer_size     => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_max_header_bytes      => DEFAULT_MAX_HEADER_BYTES: usize,
    min_header_bytes              => MIN_HEADER_BYTES: usize,
    default_header_timeout_secs   => DEFAULT_HEADER_TIMEOUT_SECS: u64,
    default_usage_flush_interval_secs => DEFAULT_USAGE_FLUSH_INTERVAL_SECS: u64,
    default_connection_backlog    => DEFAULT_CONNECTION_BACKLOG: u32,
    default_tcp_no_delay          => DEFAULT_TCP_NO_DELAY: bool,
    default_shutdown_timeout_secs => DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64,
    default_rate_limit_max_connections => DEFAULT_RATE_LIMIT_MAX_CONNECTIONS: u32,
    default_rate_limit_window_secs     => DEFAULT_RATE_LIMIT_WINDOW_SECS: u64,
    default_rate_limit_cleanup_secs    => DEFAULT_RATE_LIMIT_CLEANUP_SECS: u64,
    default_ws_max_frame_bytes    => DEFAULT_WS_MAX_FRAME_BYTES: usize,
    default_connect_timeout_secs  => DEFAULT_CONNECT_TIMEOUT_SECS: u64,
    default_dns_timeout_secs      => DEFAULT_DNS_TIMEOUT_SECS: u64,
    default_user_cache_ttl_secs   => DEFAULT_USER_CACHE_TTL_SECS: u64,
    default_ip_entry_ttl_secs     => DEFAULT_ACTIVE_IP_ENTRY_TTL_SECS: u64,
    default_ip_set_ttl_secs       => DEFAULT_ACTIVE_IP_SET_TTL_SECS: u64,
}

default_string_fns! {
    default_listen       => DEFAULT_LISTEN,
    default_ws_path      => DEFAULT_WS_PATH,
    default_dns_upstream => DEFAULT_DNS_UPSTREAM,
}
