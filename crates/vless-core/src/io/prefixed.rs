//! Stream wrapper that replays bytes consumed while sniffing the HTTP upgrade.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Yields `head` before any byte of the inner stream. Writes pass straight through.
///
/// The accept path reads the request head off the socket to decide between an
/// upgrade and a plain HTTP reply; the WebSocket handshake then needs those
/// bytes back, which is what this wrapper provides.
pub struct PrefixedStream<S> {
    head: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(head: Bytes, inner: S) -> Self {
        Self { head, inner }
    }

    /// Bytes of the head not yet handed to a reader.
    pub fn pending_head(&self) -> usize {
        self.head.len()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.head.has_remaining() {
            let n = self.head.len().min(buf.remaining());
            buf.put_slice(&self.head[..n]);
            self.head.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn replays_head_then_inner() {
        let (mut peer, local) = duplex(256);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"GET / HTTP/1.1\r\n"), local);

        peer.write_all(b"Host: a\r\n\r\n").await.unwrap();
        drop(peer);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(stream.pending_head(), 0);
    }

    #[tokio::test]
    async fn small_reads_drain_head_in_order() {
        let (_peer, local) = duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"abcdef"), local);

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.pending_head(), 2);
        assert_eq!(stream.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[tokio::test]
    async fn writes_bypass_head() {
        let (mut peer, local) = duplex(64);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"unread"), local);

        stream.write_all(b"reply").await.unwrap();
        let mut buf = [0u8; 8];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"reply");
        assert_eq!(stream.pending_head(), 6);
    }
}
