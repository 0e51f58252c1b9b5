//! Accept loop and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vless_auth::AuthServices;
use vless_config::Config;
use vless_metrics::{
    record_connection_accepted, record_connection_closed, record_connection_rejected,
    record_error,
};

use crate::dns::DnsResolver;
use crate::error::ServerError;
use crate::handler::handle_conn;
use crate::outbound::Outbound;
use crate::rate_limit::{ConnectionThrottle, RateLimiter};
use crate::state::ServerState;
use crate::util::{ConnectionTracker, create_listener};

/// Run the server until `shutdown` fires, with the rate limiter described by
/// the config (if any).
pub async fn run_with_shutdown(
    config: Config,
    auth: AuthServices,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let limiter = config.server.rate_limit.as_ref().map(|rl| {
        info!(
            max_per_ip = rl.max_connections_per_ip,
            window_secs = rl.window_secs,
            "rate limiting enabled"
        );
        let limiter = Arc::new(RateLimiter::new(rl.max_connections_per_ip, rl.window_secs));
        limiter.start_cleanup_task(Duration::from_secs(rl.cleanup_interval_secs));
        limiter
    });
    let throttle = limiter
        .clone()
        .map(|l| l as Arc<dyn ConnectionThrottle>);

    let result = serve(config, auth, throttle, shutdown).await;
    if let Some(limiter) = limiter {
        limiter.shutdown();
    }
    result
}

/// Run the server with an explicit connection throttle.
pub async fn serve(
    config: Config,
    auth: AuthServices,
    throttle: Option<Arc<dyn ConnectionThrottle>>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|_| ServerError::Config(format!("invalid listen address '{}'", config.server.listen)))?;

    let dns = DnsResolver::from_upstream(
        &config.dns.upstream,
        Duration::from_secs(config.dns.timeout_secs),
    )?;
    let state = Arc::new(ServerState {
        auth,
        outbound: Outbound::from_config(&config.outbound, config.server.no_delay),
        dns,
        websocket: config.websocket.clone(),
        max_header_bytes: config.server.max_header_bytes,
        header_timeout: Duration::from_secs(config.server.header_timeout_secs),
        tcp_idle_timeout: Duration::from_secs(config.server.tcp_idle_timeout_secs),
        relay_buffer_size: config.server.relay_buffer_size,
        usage_flush_interval: Duration::from_secs(config.server.usage_flush_interval_secs),
        ip_renew_interval: ServerState::renew_interval_for(Duration::from_secs(
            config.auth.ip_entry_ttl_secs,
        )),
    });
    let tracker = ConnectionTracker::new();

    // 0 = unlimited
    let conn_limit = (config.server.max_connections > 0).then(|| {
        info!(max_connections = config.server.max_connections, "connection limit set");
        Arc::new(Semaphore::new(config.server.max_connections))
    });

    let listener = create_listener(listen, config.server.connection_backlog)?;
    info!(
        address = %listen,
        path = %config.websocket.path,
        backlog = config.server.connection_backlog,
        "listening"
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };

                if let Some(throttle) = &throttle
                    && !throttle.allow(peer.ip())
                {
                    debug!(peer = %peer, reason = "rate_limit", "connection rejected");
                    record_connection_rejected("rate_limit");
                    continue;
                }

                let permit: Option<OwnedSemaphorePermit> = match &conn_limit {
                    Some(sem) => match sem.clone().try_acquire_owned() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            debug!(peer = %peer, reason = "max_connections", "connection rejected");
                            record_connection_rejected("max_connections");
                            continue;
                        }
                    },
                    None => None,
                };

                if config.server.no_delay {
                    let _ = tcp.set_nodelay(true);
                }
                debug!(peer = %peer, "new connection");

                let state = state.clone();
                let guard = tracker.track();
                tokio::spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    record_connection_accepted();
                    let start = Instant::now();

                    let result = handle_conn(tcp, state, peer).await;

                    let duration_secs = start.elapsed().as_secs_f64();
                    record_connection_closed(duration_secs);
                    match &result {
                        Err(err) => {
                            record_error(err.error_type());
                            if matches!(err, ServerError::Proto(_) | ServerError::UnsupportedUdpPort(_)) {
                                debug!(peer = %peer, error = %err, "rejected request header");
                            } else {
                                warn!(peer = %peer, duration_secs, error = %err, "connection closed with error");
                            }
                        }
                        Ok(()) => debug!(peer = %peer, duration_secs, "connection closed"),
                    }
                });
            }
        }
    }

    let active = tracker.count();
    if active > 0 {
        info!(active, "waiting for connections to drain");
        let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
        if tracker.wait_for_zero(timeout).await {
            info!("all connections drained");
        } else {
            warn!(remaining = tracker.count(), "shutdown timeout, connections still active");
        }
    }

    info!("server stopped");
    Ok(())
}
