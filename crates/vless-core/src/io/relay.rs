//! Session relay between the client transport and the upstream channel.
//!
//! Both directions are driven as poll-based state machines inside a single
//! future, so back-pressure on one direction never stalls the other. Every
//! chunk is reported to a [`RelayObserver`] after it is read and before it is
//! written, which lets the caller account for traffic and cut the session off
//! before an over-quota chunk is forwarded.
//!
//! Unlike a plain proxy copy, the relay does not half-close: the first
//! direction that ends (EOF, error, cutoff) ends the whole relay and the caller
//! tears down both channels.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant as TokioInstant;

/// Direction of a relayed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream.
    Uplink,
    /// Upstream to client.
    Downlink,
}

impl Direction {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Uplink => "uplink",
            Direction::Downlink => "downlink",
        }
    }
}

/// Decision returned by an observer for each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    /// Stop the session; the chunk is not forwarded.
    Cutoff(&'static str),
}

/// Receives the size of every chunk before it is forwarded.
pub trait RelayObserver {
    fn on_chunk(&self, direction: Direction, bytes: u64) -> Verdict;
}

/// Observer that forwards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RelayObserver for NoOpObserver {
    #[inline]
    fn on_chunk(&self, _direction: Direction, _bytes: u64) -> Verdict {
        Verdict::Forward
    }
}

/// Why the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    IdleTimeout,
    Cutoff(&'static str),
}

/// Tuning for [`relay_session`].
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub idle_timeout: Duration,
    pub buffer_size: usize,
    /// Bytes written in front of the first downlink chunk, in the same write.
    pub downlink_prefix: Bytes,
}

enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing,
}

enum PumpPoll {
    Forwarded,
    Eof,
    Cutoff(&'static str),
}

struct Pump {
    direction: Direction,
    buf: Box<[u8]>,
    /// Length of a pending prefix parked at the start of `buf`.
    prefix: usize,
    state: CopyState,
}

impl Pump {
    fn new(direction: Direction, buffer_size: usize, prefix: &[u8]) -> Self {
        let mut buf = vec![0u8; buffer_size.max(1) + prefix.len()].into_boxed_slice();
        buf[..prefix.len()].copy_from_slice(prefix);
        Self {
            direction,
            buf,
            prefix: prefix.len(),
            state: CopyState::Reading,
        }
    }

    fn poll_pump<R, W, O>(
        &mut self,
        cx: &mut Context<'_>,
        reader: &mut R,
        writer: &mut W,
        observer: &O,
    ) -> Poll<io::Result<PumpPoll>>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
        O: RelayObserver + ?Sized,
    {
        loop {
            match &mut self.state {
                CopyState::Reading => {
                    let start = self.prefix;
                    let mut read_buf = ReadBuf::new(&mut self.buf[start..]);
                    match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => {
                            let n = read_buf.filled().len();
                            if n == 0 {
                                return Poll::Ready(Ok(PumpPoll::Eof));
                            }
                            if let Verdict::Cutoff(reason) =
                                observer.on_chunk(self.direction, n as u64)
                            {
                                return Poll::Ready(Ok(PumpPoll::Cutoff(reason)));
                            }
                            self.prefix = 0;
                            self.state = CopyState::Writing(0, start + n);
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                CopyState::Writing(pos, len) => {
                    match Pin::new(&mut *writer).poll_write(cx, &self.buf[*pos..*len]) {
                        Poll::Ready(Ok(0)) => {
                            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                        }
                        Poll::Ready(Ok(n)) => {
                            *pos += n;
                            if *pos >= *len {
                                self.state = CopyState::Flushing;
                            }
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                CopyState::Flushing => match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        self.state = CopyState::Reading;
                        return Poll::Ready(Ok(PumpPoll::Forwarded));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}

/// Relay bytes between `client` and `upstream` until either side ends.
///
/// `options.downlink_prefix` (the protocol ack) is emitted together with the
/// first upstream chunk, so it strictly precedes every other downlink byte.
/// The idle timer fires when neither direction moved data within
/// `options.idle_timeout`.
///
/// Channels are not shut down here; the caller owns teardown.
pub async fn relay_session<A, B, O>(
    client: A,
    upstream: B,
    options: &RelayOptions,
    observer: &O,
) -> io::Result<RelayEnd>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    O: RelayObserver + ?Sized,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut up_r, mut up_w) = tokio::io::split(upstream);

    let mut uplink = Pump::new(Direction::Uplink, options.buffer_size, &[]);
    let mut downlink = Pump::new(
        Direction::Downlink,
        options.buffer_size,
        &options.downlink_prefix,
    );

    let idle_timeout = options.idle_timeout;
    let idle_sleep = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_sleep);

    loop {
        let step = std::future::poll_fn(|cx| {
            let mut progressed = false;

            match uplink.poll_pump(cx, &mut client_r, &mut up_w, observer) {
                Poll::Ready(Ok(PumpPoll::Forwarded)) => progressed = true,
                Poll::Ready(Ok(PumpPoll::Eof)) => {
                    return Poll::Ready(Ok(Some(RelayEnd::ClientClosed)));
                }
                Poll::Ready(Ok(PumpPoll::Cutoff(reason))) => {
                    return Poll::Ready(Ok(Some(RelayEnd::Cutoff(reason))));
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }

            match downlink.poll_pump(cx, &mut up_r, &mut client_w, observer) {
                Poll::Ready(Ok(PumpPoll::Forwarded)) => progressed = true,
                Poll::Ready(Ok(PumpPoll::Eof)) => {
                    return Poll::Ready(Ok(Some(RelayEnd::UpstreamClosed)));
                }
                Poll::Ready(Ok(PumpPoll::Cutoff(reason))) => {
                    return Poll::Ready(Ok(Some(RelayEnd::Cutoff(reason))));
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }

            if progressed {
                Poll::Ready(Ok(None))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = step => {
                match result? {
                    Some(end) => return Ok(end),
                    None => idle_sleep.as_mut().reset(TokioInstant::now() + idle_timeout),
                }
            }
            _ = &mut idle_sleep => return Ok(RelayEnd::IdleTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[derive(Default)]
    struct Counting {
        uplink: AtomicU64,
        downlink: AtomicU64,
        limit: Option<u64>,
    }

    impl RelayObserver for Counting {
        fn on_chunk(&self, direction: Direction, bytes: u64) -> Verdict {
            let counter = match direction {
                Direction::Uplink => &self.uplink,
                Direction::Downlink => &self.downlink,
            };
            counter.fetch_add(bytes, Ordering::Relaxed);
            let total = self.uplink.load(Ordering::Relaxed) + self.downlink.load(Ordering::Relaxed);
            match self.limit {
                Some(limit) if total >= limit => Verdict::Cutoff("quota_exceeded"),
                _ => Verdict::Forward,
            }
        }
    }

    fn options(prefix: &'static [u8]) -> RelayOptions {
        RelayOptions {
            idle_timeout: Duration::from_secs(5),
            buffer_size: 1024,
            downlink_prefix: Bytes::from_static(prefix),
        }
    }

    #[tokio::test]
    async fn forwards_both_ways_and_prefixes_first_downlink_chunk() {
        let (client, client_side) = duplex(1024);
        let (upstream_side, upstream) = duplex(1024);
        let observer = std::sync::Arc::new(Counting::default());

        let obs = observer.clone();
        let relay = tokio::spawn(async move {
            relay_session(client_side, upstream_side, &options(&[0, 0]), &*obs).await
        });

        let (mut client_r, mut client_w) = tokio::io::split(client);
        let (mut up_r, mut up_w) = tokio::io::split(upstream);

        client_w.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = up_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        up_w.write_all(b"pong").await.unwrap();
        let n = client_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x00\x00pong");

        up_w.write_all(b"more").await.unwrap();
        let n = client_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"more");

        drop(up_w);
        drop(up_r);
        let end = relay.await.unwrap().unwrap();
        assert_eq!(end, RelayEnd::UpstreamClosed);
        assert_eq!(observer.uplink.load(Ordering::Relaxed), 4);
        assert_eq!(observer.downlink.load(Ordering::Relaxed), 8);
    }

    #[tokio::test]
    async fn client_eof_ends_relay_without_waiting_for_upstream() {
        let (client, client_side) = duplex(64);
        let (upstream_side, _upstream) = duplex(64);

        let relay = tokio::spawn(async move {
            relay_session(client_side, upstream_side, &options(&[]), &NoOpObserver).await
        });
        drop(client);

        assert_eq!(relay.await.unwrap().unwrap(), RelayEnd::ClientClosed);
    }

    #[tokio::test]
    async fn cutoff_stops_before_chunk_is_forwarded() {
        let (mut client, client_side) = duplex(64);
        let (upstream_side, mut upstream) = duplex(64);
        let observer = Counting {
            limit: Some(2),
            ..Default::default()
        };

        client.write_all(b"ab").await.unwrap();
        let end = relay_session(client_side, upstream_side, &options(&[]), &observer)
            .await
            .unwrap();
        assert_eq!(end, RelayEnd::Cutoff("quota_exceeded"));

        drop(client);
        let mut out = Vec::new();
        upstream.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_ends_quiet_session() {
        let (_client, client_side) = duplex(64);
        let (upstream_side, _upstream) = duplex(64);
        let opts = RelayOptions {
            idle_timeout: Duration::from_millis(50),
            ..options(&[])
        };

        let end = relay_session(client_side, upstream_side, &opts, &NoOpObserver)
            .await
            .unwrap();
        assert_eq!(end, RelayEnd::IdleTimeout);
    }
}
