//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Listener / Connection Defaults
// ============================================================================

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default maximum concurrent sessions (0 = unlimited).
pub const DEFAULT_MAX_CONNECTIONS: usize = 0;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Default TCP_NODELAY on accepted and outbound sockets.
pub const DEFAULT_TCP_NO_DELAY: bool = true;

// ============================================================================
// Session / Relay Defaults
// ============================================================================

/// Default idle timeout for a relayed TCP session in seconds.
pub const DEFAULT_TCP_IDLE_TIMEOUT_SECS: u64 = 600;
/// Default relay buffer size (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default maximum bytes buffered while waiting for a complete protocol header.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;
/// Default seconds to wait for the first protocol chunk after the upgrade.
pub const DEFAULT_HEADER_TIMEOUT_SECS: u64 = 10;
/// Default interval between usage flushes for long sessions.
pub const DEFAULT_USAGE_FLUSH_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Outbound Defaults
// ============================================================================

/// Default timeout for one outbound connect attempt in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// DNS Defaults
// ============================================================================

/// Default resolver for tunneled DNS queries.
pub const DEFAULT_DNS_UPSTREAM: &str = "udp://8.8.4.4:53";
/// Default timeout for a single DNS exchange in seconds.
pub const DEFAULT_DNS_TIMEOUT_SECS: u64 = 5;
/// Maximum size of a DNS answer read from a UDP resolver.
pub const DNS_MAX_ANSWER_BYTES: usize = 4096;

// ============================================================================
// Cache Defaults
// ============================================================================

/// Default TTL of a cached user record in seconds.
pub const DEFAULT_USER_CACHE_TTL_SECS: u64 = 3600;
/// Default lifetime of one Active-IP registration in seconds.
pub const DEFAULT_ACTIVE_IP_ENTRY_TTL_SECS: u64 = 65;
/// Default TTL of a whole Active-IP set in seconds.
pub const DEFAULT_ACTIVE_IP_SET_TTL_SECS: u64 = 120;
/// Sweep period for expired in-process cache entries.
pub const DEFAULT_CACHE_PURGE_INTERVAL_SECS: u64 = 60;

// ============================================================================
// Rate Limit Defaults
// ============================================================================

/// Default max connections per IP for rate limiting.
pub const DEFAULT_RATE_LIMIT_MAX_CONNECTIONS: u32 = 30;
/// Default rate limit window in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
/// Default rate limit cleanup interval in seconds.
pub const DEFAULT_RATE_LIMIT_CLEANUP_SECS: u64 = 300;

// ============================================================================
// WebSocket Defaults
// ============================================================================

/// Default WebSocket path.
pub const DEFAULT_WS_PATH: &str = "/";
/// Default max WebSocket frame size.
pub const DEFAULT_WS_MAX_FRAME_BYTES: usize = 1 << 20;
/// Request header carrying base64url early data.
pub const EARLY_DATA_HEADER: &str = "sec-websocket-protocol";
/// Initial buffer size for reading HTTP headers during the upgrade.
pub const DEFAULT_HTTP_HEADER_BUFFER: usize = 2048;

// ============================================================================
// Protocol Constants
// ============================================================================

/// The only protocol version accepted.
pub const PROTOCOL_VERSION: u8 = 0;
/// Headers shorter than this are rejected without further parsing.
pub const MIN_HEADER_BYTES: usize = 24;
/// DNS over the tunnel is only allowed to this port.
pub const DNS_PORT: u16 = 53;
