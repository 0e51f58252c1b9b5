//! DNS over the tunnel: length-prefixed queries in, length-prefixed answers out.
//!
//! Queries are answered one at a time against the configured resolver. The
//! ack is sent once, in the same message as the first answer.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};
use vless_core::io::{Direction, RelayObserver, Verdict};
use vless_metrics::record_dns_query;
use vless_proto::{MAX_UDP_FRAME_PAYLOAD, parse_udp_frame, write_udp_frame};

use super::Session;
use crate::error::ServerError;
use crate::relay::with_usage_flush;
use crate::ws::{CloseReason, WsIo};

/// Handle the UDP command (port 53) for an authorized session.
pub async fn handle_dns<S>(
    ws: &mut WsIo<S>,
    session: &Session<'_>,
    initial: Bytes,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = with_usage_flush(
        session.state,
        session.meter,
        session.client_ip,
        exchange_loop(&mut *ws, session, initial),
    )
    .await?;
    let _ = ws.close(reason).await;
    Ok(())
}

async fn exchange_loop<S>(
    ws: &mut WsIo<S>,
    session: &Session<'_>,
    initial: Bytes,
) -> Result<CloseReason, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let state = session.state;
    let mut pending = BytesMut::from(&initial[..]);
    let mut out = BytesMut::new();
    let mut acked = false;

    loop {
        while let Some((query, used)) = parse_udp_frame(&pending) {
            if let Verdict::Cutoff(reason) =
                session.meter.on_chunk(Direction::Uplink, query.len() as u64)
            {
                return Ok(CloseReason::Policy(reason));
            }

            let result = state.dns.exchange(query).await;
            pending.advance(used);
            let answer = match result {
                Ok(answer) => {
                    record_dns_query("ok");
                    answer
                }
                Err(err) => {
                    // Lost like a datagram; the client retries.
                    record_dns_query(err.label());
                    warn!(error = %err, "dns query failed");
                    continue;
                }
            };

            if answer.len() > MAX_UDP_FRAME_PAYLOAD {
                debug!(bytes = answer.len(), "dns answer too large to frame");
                continue;
            }
            if let Verdict::Cutoff(reason) =
                session.meter.on_chunk(Direction::Downlink, answer.len() as u64)
            {
                return Ok(CloseReason::Policy(reason));
            }

            out.clear();
            if !acked {
                out.extend_from_slice(&vless_proto::ack(session.version));
                acked = true;
            }
            if write_udp_frame(&mut out, &answer).is_err() {
                continue;
            }
            ws.write_all(&out).await?;
            ws.flush().await?;
        }

        match timeout(state.tcp_idle_timeout, ws.read_buf(&mut pending)).await {
            Ok(Ok(0)) => return Ok(CloseReason::Normal),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Ok(CloseReason::Policy("idle_timeout")),
        }
    }
}
