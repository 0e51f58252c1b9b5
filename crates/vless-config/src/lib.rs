//! Configuration loading and CLI definitions.
//!
//! Files are TOML, YAML or JSON (comments allowed), chosen by extension.
//! Every field has a default except the user source: either `auth.users`
//! or `auth.database` must be present.

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, load_config};
pub use types::*;
pub use validate::validate_config;
