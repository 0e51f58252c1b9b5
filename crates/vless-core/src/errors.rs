//! Error type labels for metrics and logging.
//!
//! Every crate classifies failures with one of these so dashboards stay stable.

/// Malformed protocol header.
pub const ERROR_PROTOCOL: &str = "protocol";
/// I/O error on either side of a session.
pub const ERROR_IO: &str = "io";
/// Destination could not be reached (direct and SOCKS5).
pub const ERROR_CONNECT: &str = "connect";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Authorization denied or user lookup failed.
pub const ERROR_AUTH: &str = "auth";
/// WebSocket upgrade or early data failure.
pub const ERROR_HANDSHAKE: &str = "handshake";
/// DNS exchange with the upstream resolver failed.
pub const ERROR_DNS: &str = "dns";
/// Usage could not be written back to the store.
pub const ERROR_PERSIST: &str = "persist";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
