//! Upstream resolver for tunneled DNS queries.
//!
//! Queries are opaque wire-format messages; the resolver never parses them.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use vless_core::defaults::DNS_MAX_ANSWER_BYTES;

const DNS_MESSAGE: &str = "application/dns-message";

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("invalid upstream '{0}'")]
    InvalidUpstream(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("resolver answered with status {0}")]
    Status(u16),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl DnsError {
    /// Label for the DNS query metric.
    pub fn label(&self) -> &'static str {
        match self {
            DnsError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}

pub enum DnsResolver {
    /// Plain DNS over UDP to one server.
    Udp { server: SocketAddr, timeout: Duration },
    /// DNS-over-HTTPS (RFC 8484 POST).
    Https {
        client: reqwest::Client,
        url: String,
        timeout: Duration,
    },
}

impl DnsResolver {
    /// Build from `udp://ip:port` or an `https://` URL.
    pub fn from_upstream(upstream: &str, timeout: Duration) -> Result<Self, DnsError> {
        if let Some(addr) = upstream.strip_prefix("udp://") {
            let server = addr
                .parse()
                .map_err(|_| DnsError::InvalidUpstream(upstream.to_string()))?;
            return Ok(DnsResolver::Udp { server, timeout });
        }
        if upstream.starts_with("https://") {
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            return Ok(DnsResolver::Https {
                client,
                url: upstream.to_string(),
                timeout,
            });
        }
        Err(DnsError::InvalidUpstream(upstream.to_string()))
    }

    /// Send one query and return the full answer.
    pub async fn exchange(&self, query: &[u8]) -> Result<Vec<u8>, DnsError> {
        match self {
            DnsResolver::Udp { server, timeout } => {
                tokio::time::timeout(*timeout, exchange_udp(*server, query))
                    .await
                    .map_err(|_| DnsError::Timeout(*timeout))?
            }
            DnsResolver::Https {
                client,
                url,
                timeout,
            } => tokio::time::timeout(*timeout, exchange_https(client, url, query))
                .await
                .map_err(|_| DnsError::Timeout(*timeout))?,
        }
    }
}

async fn exchange_udp(server: SocketAddr, query: &[u8]) -> Result<Vec<u8>, DnsError> {
    let bind: SocketAddr = if server.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;
    socket.send(query).await?;
    let mut buf = vec![0u8; DNS_MAX_ANSWER_BYTES];
    let n = socket.recv(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

async fn exchange_https(
    client: &reqwest::Client,
    url: &str,
    query: &[u8],
) -> Result<Vec<u8>, DnsError> {
    let resp = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE)
        .header(reqwest::header::ACCEPT, DNS_MESSAGE)
        .body(query.to_vec())
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(DnsError::Status(resp.status().as_u16()));
    }
    Ok(resp.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upstreams() {
        let t = Duration::from_secs(1);
        assert!(matches!(
            DnsResolver::from_upstream("udp://1.1.1.1:53", t),
            Ok(DnsResolver::Udp { .. })
        ));
        assert!(matches!(
            DnsResolver::from_upstream("https://dns.example/dns-query", t),
            Ok(DnsResolver::Https { .. })
        ));
        assert!(DnsResolver::from_upstream("tcp://1.1.1.1:53", t).is_err());
        assert!(DnsResolver::from_upstream("udp://not-an-ip", t).is_err());
    }

    #[tokio::test]
    async fn udp_exchange_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut answer = buf[..n].to_vec();
            answer.extend_from_slice(b"-answer");
            server.send_to(&answer, peer).await.unwrap();
        });

        let resolver =
            DnsResolver::from_upstream(&format!("udp://{addr}"), Duration::from_secs(2)).unwrap();
        let answer = resolver.exchange(b"query").await.unwrap();
        assert_eq!(answer, b"query-answer");
    }

    #[tokio::test]
    async fn udp_exchange_times_out() {
        // Bound but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let resolver =
            DnsResolver::from_upstream(&format!("udp://{addr}"), Duration::from_millis(50))
                .unwrap();
        let err = resolver.exchange(b"q").await.unwrap_err();
        assert_eq!(err.label(), "timeout");
        drop(silent);
    }
}
