//! # vless-rs
//!
//! A WebSocket tunnel endpoint speaking the VLESS request header, with
//! per-user expiry, byte quotas and concurrent-address caps.
//!
//! ## Crates
//!
//! - [`vless_core`] - Defaults, error labels, relay and WebSocket stream adapter
//! - [`vless_proto`] - Request header codec and datagram framing
//! - [`vless_auth`] - User directory, access gate, usage accounting
//! - [`vless_config`] - Configuration loading and validation
//! - [`vless_metrics`] - Prometheus metrics
//! - [`vless_server`] - Server implementation

pub use vless_auth as auth;
pub use vless_config as config;
pub use vless_core as core;
pub use vless_metrics as metrics;
pub use vless_proto as proto;
pub use vless_server as server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use vless_auth::{AuthServices, AuthSettings, MemoryKv, MemoryStore, SystemClock, UserStore};
    pub use vless_config::{Config, load_config, validate_config};
    pub use vless_server::{CancellationToken, ServerError, run_with_shutdown, serve};
}
