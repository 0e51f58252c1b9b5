//! vless server library.
//!
//! Exposes the server for the unified CLI, integration tests and embedding.

pub mod cli;
mod dns;
mod error;
mod handler;
mod outbound;
mod rate_limit;
mod relay;
mod server;
mod socks5;
mod state;
mod util;
mod ws;

pub use cli::ServerArgs;
pub use error::ServerError;
pub use rate_limit::{ConnectionThrottle, RateLimiter};
pub use server::{run_with_shutdown, serve};
pub use tokio_util::sync::CancellationToken;
