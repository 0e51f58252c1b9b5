//! Core types and constants shared across vless crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type labels for metrics/logging
//! - The session relay and stream adapters (see [`io`] and [`transport`])

pub mod defaults;
pub mod errors;
pub mod io;
pub mod transport;

pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "vless-rs";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
