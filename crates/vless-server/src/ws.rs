//! WebSocket upgrade handling.
//!
//! The HTTP head is inspected before tungstenite sees it so that plain HTTP
//! requests and wrong paths get an ordinary status line instead of a failed
//! handshake. The byte-stream adapter lives in `vless_core::transport`.

use std::net::IpAddr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
        protocol::WebSocketConfig,
    },
};
use tracing::debug;
use vless_config::WebSocketConfig as WsCfg;
use vless_core::io::PrefixedStream;

use crate::error::ServerError;

pub use vless_core::transport::{CloseReason, WsIo};

const HTTP_HEADER_END: &[u8] = b"\r\n\r\n";

/// Result of inspecting buffered bytes of an HTTP request head.
#[derive(Debug, PartialEq, Eq)]
pub enum WsInspect {
    /// Head not complete yet.
    NeedMore,
    /// Valid upgrade on the configured path and host.
    Upgrade,
    /// Not HTTP, or HTTP without a WebSocket upgrade (400).
    BadRequest,
    /// Upgrade for another path or host (404).
    NotFound,
}

/// A completed upgrade plus what the callback lifted from the request.
pub struct Upgraded<S> {
    pub ws: WebSocketStream<PrefixedStream<S>>,
    /// Raw `Sec-WebSocket-Protocol` value, if any.
    pub protocol: Option<String>,
    /// Client address taken from the trusted header, if configured and valid.
    pub forwarded_ip: Option<IpAddr>,
}

/// Inspect buffered bytes for a WebSocket upgrade request.
pub fn inspect_request(buf: &[u8], cfg: &WsCfg) -> WsInspect {
    let Some(header_end) = find_header_end(buf) else {
        return WsInspect::NeedMore;
    };
    let Ok(head) = std::str::from_utf8(&buf[..header_end]) else {
        return WsInspect::BadRequest;
    };
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if method != "GET" || !version.starts_with("HTTP/1.1") {
        return WsInspect::BadRequest;
    }

    let mut upgrade = false;
    let mut connection_upgrade = false;
    let mut ws_key = false;
    let mut host: Option<&str> = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "upgrade" => upgrade |= value.to_ascii_lowercase().contains("websocket"),
            "connection" => connection_upgrade |= value.to_ascii_lowercase().contains("upgrade"),
            "sec-websocket-key" => ws_key |= !value.is_empty(),
            "host" => host = Some(value),
            _ => {}
        }
    }

    if !upgrade || !connection_upgrade || !ws_key {
        return WsInspect::BadRequest;
    }
    if !path_matches(cfg, path) || !host_matches(cfg, host) {
        return WsInspect::NotFound;
    }
    WsInspect::Upgrade
}

/// Complete the upgrade on `stream`, replaying the already-read `head`.
///
/// The client's `Sec-WebSocket-Protocol` is echoed back so that clients
/// carrying early data in it accept the response.
pub async fn accept_ws<S>(stream: S, head: Bytes, cfg: &WsCfg) -> Result<Upgraded<S>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_frame = (cfg.max_frame_bytes > 0).then_some(cfg.max_frame_bytes);
    let ws_cfg = WebSocketConfig {
        max_frame_size: max_frame,
        max_message_size: max_frame,
        ..WebSocketConfig::default()
    };

    let ip_header = cfg.client_ip_header.as_deref();
    let mut protocol: Option<HeaderValue> = None;
    let mut forwarded_ip: Option<IpAddr> = None;
    let callback = |req: &Request, mut resp: Response| {
        debug!(path = %req.uri().path(), "websocket upgrade");
        if let Some(value) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            resp.headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
            protocol = Some(value.clone());
        }
        if let Some(name) = ip_header {
            forwarded_ip = req
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_forwarded_ip);
        }
        Ok(resp)
    };

    let ws = accept_hdr_async_with_config(PrefixedStream::new(head, stream), callback, Some(ws_cfg))
        .await
        .map_err(|e| ServerError::Handshake(e.to_string()))?;

    Ok(Upgraded {
        ws,
        protocol: protocol.and_then(|v| v.to_str().ok().map(str::to_owned)),
        forwarded_ip,
    })
}

/// Decode early data from a `Sec-WebSocket-Protocol` value.
///
/// The value is base64url; trailing padding is tolerated.
pub fn decode_early_data(value: &str) -> Result<Bytes, base64::DecodeError> {
    let value = value.trim().trim_end_matches('=');
    if value.is_empty() {
        return Ok(Bytes::new());
    }
    URL_SAFE_NO_PAD.decode(value).map(Bytes::from)
}

/// Reply with a bodiless HTTP error and drop the connection.
pub async fn send_http_error<S>(mut stream: S, status: u16) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    let text = match status {
        404 => "Not Found",
        _ => "Bad Request",
    };
    let response =
        format!("HTTP/1.1 {status} {text}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// First address of a proxy header such as `X-Forwarded-For: a, b`.
fn parse_forwarded_ip(value: &str) -> Option<IpAddr> {
    value.split(',').next()?.trim().parse().ok()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HTTP_HEADER_END.len())
        .position(|w| w == HTTP_HEADER_END)
        .map(|idx| idx + HTTP_HEADER_END.len())
}

fn path_matches(cfg: &WsCfg, path: &str) -> bool {
    let path_only = path.split('?').next().unwrap_or("");
    path_only == cfg.path
}

fn host_matches(cfg: &WsCfg, host: Option<&str>) -> bool {
    let Some(expected) = cfg.host.as_deref() else {
        return true;
    };
    let Some(host) = host else {
        return false;
    };
    let expected = expected.trim_start_matches('[').trim_end_matches(']');
    strip_port(host).eq_ignore_ascii_case(expected)
}

/// `host[:port]` or `[v6][:port]` to the bare host. A bare IPv6 literal has
/// more than one colon and is returned as is.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(host, |(h, _)| h);
    }
    match host.split_once(':') {
        Some((h, port)) if !port.contains(':') => h,
        _ => host,
    }
}
