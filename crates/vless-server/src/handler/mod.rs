//! Per-connection pipeline: HTTP upgrade, request header, access check,
//! then the TCP relay or the DNS exchange.

mod dns;
mod tcp;

pub use dns::handle_dns;
pub use tcp::handle_tcp;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, warn};
use vless_auth::Deny;
use vless_core::defaults::{DEFAULT_HTTP_HEADER_BUFFER, DNS_PORT};
use vless_metrics::record_auth_result;
use vless_proto::{Command, ParseError};

use crate::error::ServerError;
use crate::outbound::TargetHost;
use crate::relay::SessionMeter;
use crate::state::ServerState;
use crate::ws::{
    CloseReason, WsInspect, WsIo, accept_ws, decode_early_data, inspect_request, send_http_error,
};

/// What the decoded header asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    Tcp { host: TargetHost, port: u16 },
    Dns,
}

/// Fields lifted from the request header before its buffer is split.
#[derive(Debug)]
pub struct SessionRequest {
    pub version: u8,
    pub user_id: String,
    pub kind: SessionKind,
    pub payload: Bytes,
}

/// An authorized session, shared by the TCP and DNS paths.
pub struct Session<'a> {
    pub state: &'a ServerState,
    pub meter: &'a SessionMeter,
    pub client_ip: IpAddr,
    /// Echoed in the ack.
    pub version: u8,
}

/// Handle one accepted TCP connection end to end.
pub async fn handle_conn<S>(
    mut stream: S,
    state: Arc<ServerState>,
    peer: SocketAddr,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut head = BytesMut::with_capacity(DEFAULT_HTTP_HEADER_BUFFER);
    let inspected = timeout(
        state.header_timeout,
        read_http_head(&mut stream, &mut head, &state),
    )
    .await
    .map_err(|_| ServerError::HeaderTimeout)??;

    match inspected {
        WsInspect::Upgrade => {}
        WsInspect::NotFound => {
            debug!(peer = %peer, "upgrade for unknown path or host");
            return send_http_error(stream, 404).await;
        }
        WsInspect::BadRequest | WsInspect::NeedMore => {
            debug!(peer = %peer, "not a websocket upgrade");
            return send_http_error(stream, 400).await;
        }
    }

    let upgraded = timeout(
        state.header_timeout,
        accept_ws(stream, head.freeze(), &state.websocket),
    )
    .await
    .map_err(|_| ServerError::HeaderTimeout)??;
    let client_ip = upgraded.forwarded_ip.unwrap_or(peer.ip());
    let early = upgraded.protocol.as_deref().map(decode_early_data);
    let mut ws = WsIo::new(upgraded.ws);

    match early {
        Some(Ok(data)) => ws = ws.with_early_data(data),
        Some(Err(err)) => {
            debug!(peer = %peer, error = %err, "undecodable early data");
            let _ = ws.close(CloseReason::Policy("bad_early_data")).await;
            return Ok(());
        }
        None => {}
    }

    let result = serve(&mut ws, &state, peer, client_ip).await;
    if let Err(err) = &result {
        let _ = ws.close(close_reason(err)).await;
    }
    result
}

/// Read until the HTTP head is complete or provably not an upgrade.
async fn read_http_head<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    state: &ServerState,
) -> Result<WsInspect, ServerError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let n = stream.read_buf(buf).await?;
        let inspected = inspect_request(buf, &state.websocket);
        if inspected != WsInspect::NeedMore {
            return Ok(inspected);
        }
        if n == 0 || buf.len() > state.max_header_bytes {
            return Ok(WsInspect::BadRequest);
        }
    }
}

/// Session phase on an upgraded transport. Policy denials close the
/// transport here and return `Ok`; errors are closed by the caller.
async fn serve<S>(
    ws: &mut WsIo<S>,
    state: &ServerState,
    peer: SocketAddr,
    client_ip: IpAddr,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let buf = timeout(
        state.header_timeout,
        read_request_header(ws, state.max_header_bytes),
    )
    .await
    .map_err(|_| ServerError::HeaderTimeout)??;
    let request = split_request(buf)?;

    if let SessionKind::Tcp { host, port } = &request.kind {
        debug!(peer = %peer, user = %request.user_id, target = %host, port, "tcp request");
    } else {
        debug!(peer = %peer, user = %request.user_id, "dns request");
    }

    let user = state.auth.directory.resolve(&request.user_id).await?;
    let decision = state
        .auth
        .gate
        .authorize(user.as_ref(), 0, client_ip)
        .await
        .and_then(|()| user.ok_or(Deny::NoSuchUser));
    let user = match decision {
        Ok(user) => user,
        Err(deny) => {
            debug!(peer = %peer, user = %request.user_id, reason = deny.reason(), "session denied");
            record_auth_result(deny.reason());
            let _ = ws.close(CloseReason::Policy(deny.reason())).await;
            return Ok(());
        }
    };
    record_auth_result("ok");

    let meter = SessionMeter::new(user);
    let session = Session {
        state,
        meter: &meter,
        client_ip,
        version: request.version,
    };
    let result = match request.kind {
        SessionKind::Tcp { host, port } => {
            handle_tcp(ws, &session, &host, port, request.payload).await
        }
        SessionKind::Dns => handle_dns(ws, &session, request.payload).await,
    };

    if !meter.flush(state).await {
        warn!(user = %meter.user().id, bytes = meter.unflushed(), "session usage not persisted");
    }
    debug!(
        peer = %peer,
        user = %meter.user().id,
        uplink = meter.uplink(),
        downlink = meter.downlink(),
        "session finished"
    );
    result
}

/// Accumulate the first protocol bytes until the header decodes.
async fn read_request_header<S>(ws: &mut WsIo<S>, max: usize) -> Result<BytesMut, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        match vless_proto::decode(&buf) {
            Ok(_) => return Ok(buf),
            Err(ParseError::Truncated) if buf.len() < max => {}
            Err(err) => return Err(err.into()),
        }
        if ws.read_buf(&mut buf).await? == 0 {
            return Err(ParseError::Truncated.into());
        }
    }
}

/// Decode the header in `buf` and split off the payload that follows it.
///
/// UDP is only carried for DNS; any other port is refused here, before the
/// client address is registered.
pub fn split_request(mut buf: BytesMut) -> Result<SessionRequest, ServerError> {
    let header = vless_proto::decode(&buf)?;
    let version = header.version;
    let user_id = header.session_id_str();
    let offset = header.payload_offset;
    let kind = match header.command {
        Command::Tcp => SessionKind::Tcp {
            host: TargetHost::from(&header.host),
            port: header.port,
        },
        Command::Udp if header.port == DNS_PORT => SessionKind::Dns,
        Command::Udp => return Err(ServerError::UnsupportedUdpPort(header.port)),
    };
    let payload = buf.split_off(offset).freeze();
    Ok(SessionRequest {
        version,
        user_id,
        kind,
        payload,
    })
}

/// Close status for a session that ended in error.
fn close_reason(err: &ServerError) -> CloseReason {
    match err {
        ServerError::Proto(e) => CloseReason::Policy(e.reason()),
        ServerError::UnsupportedUdpPort(_) => CloseReason::Policy("unsupported_udp_port"),
        ServerError::HeaderTimeout => CloseReason::Policy("header_timeout"),
        ServerError::Connect(_) => CloseReason::Error("connect_failed"),
        ServerError::Dns(_) => CloseReason::Error("dns_failed"),
        ServerError::Auth(_) => CloseReason::Error("auth_unavailable"),
        _ => CloseReason::Error("internal_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::Outbound;
    use async_trait::async_trait;
    use bytes::BufMut;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vless_auth::{
        AuthError, AuthServices, AuthSettings, MemoryKv, MemoryStore, SystemClock, UserRecord,
        UserStore, UserUpdate,
    };
    use std::net::Ipv4Addr;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use uuid::Uuid;
    use vless_proto::{HostRef, write_request};

    const ID: &str = "4e7f2a9c-6b1d-4c8e-9f3a-2d5b7c9e1f04";

    fn header(command: Command, host: HostRef<'_>, port: u16, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        let id = Uuid::parse_str(ID).unwrap();
        write_request(&mut buf, &id, command, &host, port).unwrap();
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn splits_tcp_request_and_payload() {
        let buf = header(
            Command::Tcp,
            HostRef::Ipv4(Ipv4Addr::new(93, 184, 216, 34)),
            443,
            b"GET /",
        );
        let req = split_request(buf).unwrap();
        assert_eq!(req.user_id, ID);
        assert_eq!(req.version, 0);
        assert_eq!(
            req.kind,
            SessionKind::Tcp {
                host: TargetHost::Ip("93.184.216.34".parse().unwrap()),
                port: 443
            }
        );
        assert_eq!(&req.payload[..], b"GET /");
    }

    #[test]
    fn udp_only_for_dns() {
        let dns = header(Command::Udp, HostRef::Ipv4(Ipv4Addr::new(8, 8, 8, 8)), 53, b"");
        assert_eq!(split_request(dns).unwrap().kind, SessionKind::Dns);

        let other = header(Command::Udp, HostRef::Domain("ntp.example"), 123, b"");
        let err = split_request(other).unwrap_err();
        assert!(matches!(err, ServerError::UnsupportedUdpPort(123)));
        assert_eq!(close_reason(&err), CloseReason::Policy("unsupported_udp_port"));
    }

    #[test]
    fn bad_header_maps_to_policy_close() {
        let err = split_request(BytesMut::from(&[0u8; 10][..])).unwrap_err();
        assert_eq!(close_reason(&err), CloseReason::Policy("truncated_header"));
    }

    #[tokio::test]
    async fn header_split_across_messages() {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;

        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let full = header(Command::Tcp, HostRef::Domain("example.com"), 80, b"hi");
        let first = full[..5].to_vec();
        let rest = full[5..].to_vec();
        // First five bytes ride as early data, the rest as a message.
        let mut ws = WsIo::new(server).with_early_data(Bytes::from(first));
        client.send(Message::Binary(rest)).await.unwrap();

        let buf = read_request_header(&mut ws, 8192).await.unwrap();
        let req = split_request(buf).unwrap();
        assert_eq!(&req.payload[..], b"hi");
    }

    #[tokio::test]
    async fn eof_before_header_is_truncated() {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;

        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut ws = WsIo::new(server).with_early_data(Bytes::from_static(&[0u8; 10]));
        client.send(Message::Close(None)).await.unwrap();

        let err = read_request_header(&mut ws, 8192).await.unwrap_err();
        assert!(matches!(err, ServerError::Proto(ParseError::Truncated)));
    }

    struct CountingStore {
        inner: MemoryStore,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl UserStore for CountingStore {
        async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, AuthError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_user(id).await
        }
        async fn insert_user(&self, r: &UserRecord) -> Result<(), AuthError> {
            self.inner.insert_user(r).await
        }
        async fn update_user_fields(&self, id: &str, u: &UserUpdate) -> Result<bool, AuthError> {
            self.inner.update_user_fields(id, u).await
        }
        async fn increment_usage(&self, id: &str, b: u64) -> Result<(), AuthError> {
            self.inner.increment_usage(id, b).await
        }
        async fn reset_usage(&self, id: &str) -> Result<bool, AuthError> {
            self.inner.reset_usage(id).await
        }
        async fn delete_user(&self, id: &str) -> Result<bool, AuthError> {
            self.inner.delete_user(id).await
        }
        async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError> {
            self.inner.list_users().await
        }
    }

    #[tokio::test]
    async fn short_header_never_looks_up_or_connects() {
        use futures_util::SinkExt;
        use tokio::net::TcpListener;
        use tokio_tungstenite::tungstenite::Message;
        use vless_config::{OutboundConfig, Socks5Config};

        let store = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
        });
        let auth = AuthServices::new(
            store.clone(),
            Arc::new(MemoryKv::new()),
            Arc::new(SystemClock),
            AuthSettings::default(),
        );
        // Every outbound attempt would land on this listener.
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut state = ServerState::for_tests(auth);
        state.outbound = Outbound::from_config(
            &OutboundConfig {
                socks5: Some(Socks5Config {
                    address: upstream.local_addr().unwrap().to_string(),
                    username: None,
                    password: None,
                }),
                force_socks5: true,
                ..OutboundConfig::default()
            },
            true,
        );

        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut ws = WsIo::new(server).with_early_data(Bytes::from_static(&[0u8; 10]));
        client.send(Message::Close(None)).await.unwrap();

        let peer: SocketAddr = "198.51.100.7:40000".parse().unwrap();
        let err = serve(&mut ws, &state, peer, peer.ip()).await.unwrap_err();
        assert!(matches!(err, ServerError::Proto(ParseError::Truncated)));
        assert_eq!(close_reason(&err), CloseReason::Policy("truncated_header"));

        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        let accepted =
            tokio::time::timeout(std::time::Duration::from_millis(200), upstream.accept()).await;
        assert!(accepted.is_err(), "no outbound connection expected");
    }
}
