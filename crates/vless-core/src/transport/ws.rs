//! WebSocket stream adapter.
//!
//! `WsIo` wraps a `WebSocketStream` and exposes it as `AsyncRead + AsyncWrite`
//! using binary messages, so the protocol handler and the relay can treat the
//! tunnel as a plain byte stream. Early data lifted from the upgrade request is
//! replayed before the first message.

use std::borrow::Cow;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Error as WsError, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

/// Close status sent to the client on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Session finished normally.
    Normal,
    /// Client violated protocol or policy (bad header, denied, over quota).
    Policy(&'static str),
    /// Server-side failure (upstream unreachable, relay error).
    Error(&'static str),
}

impl CloseReason {
    fn frame(self) -> CloseFrame<'static> {
        let (code, reason) = match self {
            CloseReason::Normal => (CloseCode::Normal, ""),
            CloseReason::Policy(r) => (CloseCode::Policy, r),
            CloseReason::Error(r) => (CloseCode::Error, r),
        };
        CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Normal => "normal",
            CloseReason::Policy(r) | CloseReason::Error(r) => r,
        }
    }
}

/// Byte-stream view of a WebSocket connection.
///
/// - Binary and text messages are read as one continuous stream
/// - Each write is sent as one binary message
/// - Pings are answered, a close message reads as EOF
pub struct WsIo<S> {
    ws: WebSocketStream<S>,
    read_buf: Bytes,
    closed: bool,
}

impl<S> WsIo<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            read_buf: Bytes::new(),
            closed: false,
        }
    }

    /// Replay `early` before the first message read from the socket.
    pub fn with_early_data(mut self, early: Bytes) -> Self {
        self.read_buf = early;
        self
    }

    pub fn into_inner(self) -> WebSocketStream<S> {
        self.ws
    }

    fn take_buffered(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.read_buf.len().min(buf.remaining());
        buf.put_slice(&self.read_buf[..n]);
        self.read_buf.advance(n);
    }
}

impl<S> WsIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a close frame carrying `reason`.
    ///
    /// Safe to call more than once and after the peer already went away.
    pub async fn close(&mut self, reason: CloseReason) -> std::io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.ws.close(Some(reason.frame())).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(ws_err(err)),
        }
    }
}

impl<S> AsyncRead for WsIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.read_buf.is_empty() {
            self.take_buffered(buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            match Pin::new(&mut self.ws).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => {
                    let data = match msg {
                        Message::Binary(data) => Bytes::from(data),
                        Message::Text(text) => Bytes::from(text.into_bytes()),
                        Message::Ping(payload) => {
                            let mut ws = Pin::new(&mut self.ws);
                            match ws.as_mut().poll_ready(cx) {
                                Poll::Ready(Ok(())) => {
                                    if let Err(err) = ws.start_send(Message::Pong(payload)) {
                                        return Poll::Ready(Err(ws_err(err)));
                                    }
                                    continue;
                                }
                                Poll::Ready(Err(err)) => return Poll::Ready(Err(ws_err(err))),
                                Poll::Pending => return Poll::Pending,
                            }
                        }
                        Message::Close(_) => return Poll::Ready(Ok(())),
                        Message::Pong(_) | Message::Frame(_) => continue,
                    };
                    if data.is_empty() {
                        continue;
                    }
                    self.read_buf = data;
                    self.take_buffered(buf);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(WsError::ConnectionClosed))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(ws_err(err))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WsIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut ws = Pin::new(&mut self.ws);
        match ws.as_mut().poll_ready(cx) {
            Poll::Ready(Ok(())) => {
                if let Err(err) = ws.start_send(Message::Binary(data.to_vec())) {
                    return Poll::Ready(Err(ws_err(err)));
                }
                Poll::Ready(Ok(data.len()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(ws_err(err))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.ws).poll_flush(cx).map_err(ws_err)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.closed = true;
        Pin::new(&mut self.ws).poll_close(cx).map_err(ws_err)
    }
}

fn ws_err(err: WsError) -> std::io::Error {
    std::io::Error::other(err)
}
