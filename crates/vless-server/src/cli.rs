//! CLI module for vless-server.
//!
//! Used both by the standalone binary and as the `server` subcommand of the
//! unified vless-rs CLI.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vless_auth::sql::{SqlStore, SqlStoreConfig};
use vless_auth::{
    AuthError, AuthServices, AuthSettings, Clock, MemoryKv, MemoryStore, SystemClock, UserRecord,
    UserStore, canonical_id,
};
use vless_config::{
    AuthConfig, CliOverrides, LoggingConfig, apply_overrides, load_config, validate_config,
};
use vless_core::defaults::DEFAULT_CACHE_PURGE_INTERVAL_SECS;

use crate::{CancellationToken, run_with_shutdown};

/// vless-server CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "vless-server", version, about = "WebSocket tunnel endpoint")]
pub struct ServerArgs {
    /// Config file path (json/jsonc/yaml/toml)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run the server with the given arguments.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match vless_metrics::init_prometheus(listen) {
            Ok(()) => info!(address = %listen, "metrics exporter listening"),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let auth = build_auth(&config.auth).await?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    run_with_shutdown(config, auth, shutdown).await?;
    Ok(())
}

/// Wire the auth services over the configured user source.
pub async fn build_auth(config: &AuthConfig) -> Result<AuthServices, AuthError> {
    let store: Arc<dyn UserStore> = match &config.database {
        Some(url) => {
            let mut sql = SqlStoreConfig::new(url.as_str());
            // Every connection to an in-memory sqlite database sees its own copy.
            if url.contains(":memory:") {
                sql = sql.max_connections(1);
            }
            let store = SqlStore::connect(sql).await?;
            store.init_schema().await?;
            Arc::new(store)
        }
        None => {
            let created_at = SystemClock.now().unix_timestamp();
            let records = config
                .users
                .iter()
                .map(|u| {
                    let mut record = UserRecord::new(canonical_id(&u.id)?, created_at);
                    record.expiration_date = u.expiration_date.clone();
                    record.expiration_time = u.expiration_time.clone();
                    record.data_cap = u.data_cap;
                    record.ip_limit = u.ip_limit;
                    record.note = u.note.clone();
                    Ok(record)
                })
                .collect::<Result<Vec<_>, AuthError>>()?;
            info!(users = records.len(), "static users loaded");
            Arc::new(MemoryStore::from_records(records))
        }
    };

    let settings = AuthSettings {
        user_cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        ip_entry_ttl: Duration::from_secs(config.ip_entry_ttl_secs),
        ip_set_ttl: Duration::from_secs(config.ip_set_ttl_secs),
    };
    let kv = Arc::new(MemoryKv::new());
    kv.start_cleanup_task(Duration::from_secs(DEFAULT_CACHE_PURGE_INTERVAL_SECS));
    Ok(AuthServices::new(
        store,
        kv,
        Arc::new(SystemClock),
        settings,
    ))
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize the tracing subscriber.
///
/// `format` is json, pretty or compact (default pretty); `output` is stdout
/// or stderr (default stderr). `filters` adds per-module levels on top of
/// `level`.
fn init_tracing(config: &LoggingConfig) {
    let mut directives = config.level.as_deref().unwrap_or("info").to_string();
    for (module, level) in &config.filters {
        directives.push_str(&format!(",{module}={level}"));
    }
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let to_stdout = config.output.as_deref() == Some("stdout");
    let registry = tracing_subscriber::registry().with(filter);

    match (format, to_stdout) {
        ("json", true) => registry.with(fmt::layer().json().with_writer(io::stdout)).init(),
        ("json", false) => registry.with(fmt::layer().json().with_writer(io::stderr)).init(),
        ("compact", true) => registry.with(fmt::layer().compact().with_writer(io::stdout)).init(),
        ("compact", false) => registry.with(fmt::layer().compact().with_writer(io::stderr)).init(),
        (_, true) => registry.with(fmt::layer().with_writer(io::stdout)).init(),
        (_, false) => registry.with(fmt::layer().with_writer(io::stderr)).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vless_config::UserConfig;

    #[tokio::test]
    async fn static_users_are_canonicalized() {
        let config = AuthConfig {
            users: vec![UserConfig {
                id: "  B831381D-6324-4D53-AD4F-8CDA48B30811 ".into(),
                expiration_date: Some("2099-12-31".into()),
                expiration_time: Some("23:59:59".into()),
                data_cap: 1 << 30,
                ip_limit: 2,
                note: "ops".into(),
            }],
            ..AuthConfig::default()
        };
        let auth = build_auth(&config).await.unwrap();
        let user = auth
            .directory
            .resolve("b831381d-6324-4d53-ad4f-8cda48b30811")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.data_cap, 1 << 30);
        assert_eq!(user.ip_limit, 2);
        assert_eq!(user.note, "ops");
    }

    #[tokio::test]
    async fn malformed_static_id_is_rejected() {
        let config = AuthConfig {
            users: vec![UserConfig {
                id: "not-a-uuid".into(),
                expiration_date: None,
                expiration_time: None,
                data_cap: 0,
                ip_limit: 0,
                note: String::new(),
            }],
            ..AuthConfig::default()
        };
        assert!(matches!(
            build_auth(&config).await,
            Err(AuthError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn database_source_initializes_schema() {
        let config = AuthConfig {
            database: Some("sqlite::memory:".into()),
            ..AuthConfig::default()
        };
        let auth = build_auth(&config).await.unwrap();
        assert!(auth.admin.list_users().await.unwrap().is_empty());
    }
}
