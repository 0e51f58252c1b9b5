//! TCP command: connect upstream, then relay until either side stops.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};
use vless_core::io::{Direction, RelayEnd, RelayObserver, RelayOptions, Verdict, relay_session};

use super::Session;
use crate::error::ServerError;
use crate::outbound::TargetHost;
use crate::relay::with_usage_flush;
use crate::ws::{CloseReason, WsIo};

/// Handle the TCP command for an authorized session.
///
/// The ack is not sent until the upstream answers; it rides in front of the
/// first downlink chunk.
#[instrument(level = "debug", skip(ws, session, payload), fields(user = %session.meter.user().id))]
pub async fn handle_tcp<S>(
    ws: &mut WsIo<S>,
    session: &Session<'_>,
    host: &TargetHost,
    port: u16,
    payload: Bytes,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let state = session.state;
    let route = state.outbound.route_for(host);
    let mut upstream = state.outbound.connect(route, host, port).await?;
    debug!(target = %host, port, ?route, "upstream connected");

    if !payload.is_empty() {
        if let Verdict::Cutoff(reason) = session
            .meter
            .on_chunk(Direction::Uplink, payload.len() as u64)
        {
            let _ = upstream.shutdown().await;
            let _ = ws.close(CloseReason::Policy(reason)).await;
            return Ok(());
        }
        upstream.write_all(&payload).await?;
        debug!(bytes = payload.len(), "initial payload sent");
    }

    let options = RelayOptions {
        idle_timeout: state.tcp_idle_timeout,
        buffer_size: state.relay_buffer_size,
        downlink_prefix: Bytes::copy_from_slice(&vless_proto::ack(session.version)),
    };
    let end = with_usage_flush(
        state,
        session.meter,
        session.client_ip,
        relay_session(&mut *ws, &mut upstream, &options, session.meter),
    )
    .await;

    let _ = upstream.shutdown().await;

    let end = match end {
        Ok(end) => end,
        Err(err) => {
            let _ = ws.close(CloseReason::Error("relay_error")).await;
            return Err(err.into());
        }
    };
    debug!(?end, "relay finished");
    let reason = match end {
        RelayEnd::Cutoff(reason) => CloseReason::Policy(reason),
        RelayEnd::IdleTimeout => CloseReason::Policy("idle_timeout"),
        RelayEnd::ClientClosed | RelayEnd::UpstreamClosed => CloseReason::Normal,
    };
    let _ = ws.close(reason).await;
    Ok(())
}
