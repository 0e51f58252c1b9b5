//! Unified vless-rs CLI.
//!
//! - `vless-rs server` runs the tunnel endpoint
//! - `vless-rs users` manages users in the SQL store
//!
//! Each subcommand is also available as a standalone binary.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// vless-rs unified CLI.
#[derive(Parser)]
#[command(
    name = "vless-rs",
    version,
    about = "WebSocket tunnel endpoint with per-user quotas",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server.
    #[command(name = "server", alias = "serve")]
    Server(Box<vless_server::ServerArgs>),

    /// Manage users (SQL backend).
    #[command(name = "users")]
    Users(vless_auth::UsersArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server(args) => vless_server::cli::run(*args).await,
        Commands::Users(args) => vless_auth::cli::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
