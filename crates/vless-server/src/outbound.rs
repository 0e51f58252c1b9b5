//! Outbound connector: direct TCP with a SOCKS5 fallback.
//!
//! The route is picked once per session from the destination and policy, then
//! [`Outbound::connect`] walks it. Destinations are passed through as given;
//! domains are resolved by the OS on the direct path and by the proxy on the
//! SOCKS5 path.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};
use vless_config::OutboundConfig;
use vless_metrics::{record_outbound_connect, record_socks5_fallback};
use vless_proto::HostRef;

use crate::socks5::{Credentials, Socks5Error, Socks5Upstream};

/// Owned destination host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetHost {
    Ip(IpAddr),
    Domain(String),
}

impl From<&HostRef<'_>> for TargetHost {
    fn from(host: &HostRef<'_>) -> Self {
        match host {
            HostRef::Ipv4(v4) => TargetHost::Ip(IpAddr::V4(*v4)),
            HostRef::Ipv6(v6) => TargetHost::Ip(IpAddr::V6(*v6)),
            HostRef::Domain(d) => TargetHost::Domain((*d).to_string()),
        }
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetHost::Ip(ip) => write!(f, "{ip}"),
            TargetHost::Domain(d) => f.write_str(d),
        }
    }
}

/// How a session reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    DirectThenSocks5,
    Socks5Only,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("direct connect failed: {0}")]
    Direct(std::io::Error),
    #[error("direct connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("socks5: {0}")]
    Socks5(#[from] Socks5Error),
    #[error("socks5 timed out after {0:?}")]
    Socks5Timeout(Duration),
    #[error("direct failed ({direct}); socks5 failed ({socks5})")]
    Both {
        direct: Box<ConnectError>,
        socks5: Box<ConnectError>,
    },
}

pub struct Outbound {
    connect_timeout: Duration,
    no_delay: bool,
    socks5: Option<Socks5Upstream>,
    force_socks5: bool,
    socks5_hosts: Vec<HostPattern>,
}

impl Outbound {
    pub fn from_config(cfg: &OutboundConfig, no_delay: bool) -> Self {
        let socks5 = cfg.socks5.as_ref().map(|s| Socks5Upstream {
            address: s.address.clone(),
            credentials: match (&s.username, &s.password) {
                (Some(u), Some(p)) => Some(Credentials {
                    username: u.clone(),
                    password: p.clone(),
                }),
                _ => None,
            },
        });
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            no_delay,
            socks5,
            force_socks5: cfg.force_socks5,
            socks5_hosts: cfg.socks5_hosts.iter().map(|p| HostPattern::new(p)).collect(),
        }
    }

    /// Pick the route for `host`.
    pub fn route_for(&self, host: &TargetHost) -> Route {
        if self.socks5.is_none() {
            return Route::Direct;
        }
        if self.force_socks5 || self.socks5_hosts.iter().any(|p| p.matches(host)) {
            return Route::Socks5Only;
        }
        Route::DirectThenSocks5
    }

    /// Connect to `host:port` along `route`.
    pub async fn connect(
        &self,
        route: Route,
        host: &TargetHost,
        port: u16,
    ) -> Result<TcpStream, ConnectError> {
        let stream = match route {
            Route::Direct => self.connect_direct(host, port).await?,
            Route::Socks5Only => self.connect_socks5(host, port).await?,
            Route::DirectThenSocks5 => match self.connect_direct(host, port).await {
                Ok(stream) => stream,
                Err(direct) => {
                    warn!(target = %host, port, error = %direct, "direct connect failed, trying socks5");
                    record_socks5_fallback();
                    self.connect_socks5(host, port)
                        .await
                        .map_err(|socks5| ConnectError::Both {
                            direct: Box::new(direct),
                            socks5: Box::new(socks5),
                        })?
                }
            },
        };
        if self.no_delay {
            let _ = stream.set_nodelay(true);
        }
        Ok(stream)
    }

    async fn connect_direct(&self, host: &TargetHost, port: u16) -> Result<TcpStream, ConnectError> {
        let attempt = async {
            match host {
                TargetHost::Ip(ip) => TcpStream::connect(SocketAddr::new(*ip, port)).await,
                TargetHost::Domain(d) => TcpStream::connect((d.as_str(), port)).await,
            }
        };
        let stream = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
            .map_err(ConnectError::Direct)?;
        debug!(target = %host, port, "direct connect ok");
        record_outbound_connect("direct");
        Ok(stream)
    }

    async fn connect_socks5(&self, host: &TargetHost, port: u16) -> Result<TcpStream, ConnectError> {
        let Some(upstream) = &self.socks5 else {
            return Err(ConnectError::Socks5(Socks5Error::Io(std::io::Error::other(
                "no socks5 upstream configured",
            ))));
        };
        let stream = tokio::time::timeout(self.connect_timeout, upstream.connect(host, port))
            .await
            .map_err(|_| ConnectError::Socks5Timeout(self.connect_timeout))??;
        debug!(target = %host, port, via = %upstream.address, "socks5 connect ok");
        record_outbound_connect("socks5");
        Ok(stream)
    }
}

/// `example.com` matches exactly; `*.example.com` matches subdomains and the
/// apex; `*` matches everything. Case-insensitive.
#[derive(Debug, Clone)]
struct HostPattern {
    pattern: String,
}

impl HostPattern {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.trim().trim_end_matches('.').to_ascii_lowercase(),
        }
    }

    fn matches(&self, host: &TargetHost) -> bool {
        let host = match host {
            TargetHost::Domain(d) => d.trim_end_matches('.').to_ascii_lowercase(),
            TargetHost::Ip(ip) => ip.to_string(),
        };
        if self.pattern == "*" {
            return true;
        }
        match self.pattern.strip_prefix("*.") {
            Some(suffix) => {
                host == suffix
                    || (host.len() > suffix.len()
                        && host.ends_with(suffix)
                        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
            }
            None => host == self.pattern,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use vless_config::Socks5Config;

    fn domain(d: &str) -> TargetHost {
        TargetHost::Domain(d.into())
    }

    fn config(socks5: Option<&str>) -> OutboundConfig {
        OutboundConfig {
            connect_timeout_secs: 2,
            socks5: socks5.map(|a| Socks5Config {
                address: a.into(),
                username: None,
                password: None,
            }),
            force_socks5: false,
            socks5_hosts: Vec::new(),
        }
    }

    #[test]
    fn pattern_matching() {
        let p = HostPattern::new("*.Example.com");
        assert!(p.matches(&domain("example.com")));
        assert!(p.matches(&domain("a.b.example.com")));
        assert!(!p.matches(&domain("badexample.com")));

        let exact = HostPattern::new("10.1.2.3");
        assert!(exact.matches(&TargetHost::Ip("10.1.2.3".parse().unwrap())));
        assert!(!exact.matches(&domain("10.1.2.4")));
    }

    #[test]
    fn route_selection() {
        assert_eq!(
            Outbound::from_config(&config(None), true).route_for(&domain("a.com")),
            Route::Direct
        );

        let mut cfg = config(Some("127.0.0.1:1080"));
        cfg.socks5_hosts = vec!["*.blocked.net".into()];
        let out = Outbound::from_config(&cfg, true);
        assert_eq!(out.route_for(&domain("a.com")), Route::DirectThenSocks5);
        assert_eq!(out.route_for(&domain("x.blocked.net")), Route::Socks5Only);

        cfg.force_socks5 = true;
        let out = Outbound::from_config(&cfg, true);
        assert_eq!(out.route_for(&domain("a.com")), Route::Socks5Only);
    }

    #[tokio::test]
    async fn direct_connect_to_ip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let out = Outbound::from_config(&config(None), true);
        let mut stream = out
            .connect(Route::Direct, &TargetHost::Ip(addr.ip()), addr.port())
            .await
            .unwrap();
        let (mut accepted, _) = listener.accept().await.unwrap();
        stream.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    /// Minimal no-auth SOCKS5 server that accepts one CONNECT and then echoes.
    async fn spawn_socks5() -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut greet = [0u8; 3];
            s.read_exact(&mut greet).await.unwrap();
            s.write_all(&[5, 0]).await.unwrap();
            let mut head = [0u8; 4];
            s.read_exact(&mut head).await.unwrap();
            let mut request = head.to_vec();
            let rest = match head[3] {
                1 => 4 + 2,
                4 => 16 + 2,
                _ => {
                    let mut len = [0u8; 1];
                    s.read_exact(&mut len).await.unwrap();
                    request.push(len[0]);
                    len[0] as usize + 2
                }
            };
            let mut tail = vec![0u8; rest];
            s.read_exact(&mut tail).await.unwrap();
            request.extend_from_slice(&tail);
            s.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
            let mut buf = [0u8; 64];
            let n = s.read(&mut buf).await.unwrap();
            s.write_all(&buf[..n]).await.unwrap();
            request
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn falls_back_to_socks5_when_direct_fails() {
        // Reserve a port and close it so the direct attempt is refused.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = closed.local_addr().unwrap();
        drop(closed);

        let (proxy, handle) = spawn_socks5().await;
        let out = Outbound::from_config(&config(Some(&proxy.to_string())), true);
        let host = TargetHost::Ip(dead.ip());
        let route = out.route_for(&host);
        assert_eq!(route, Route::DirectThenSocks5);

        let mut stream = out.connect(route, &host, dead.port()).await.unwrap();
        stream.write_all(b"via proxy").await.unwrap();
        let mut buf = [0u8; 9];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"via proxy");

        let request = handle.await.unwrap();
        assert_eq!(&request[..4], &[5, 1, 0, 1]);
        assert_eq!(&request[8..10], &dead.port().to_be_bytes());
    }

    #[tokio::test]
    async fn both_routes_failing_reports_both() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = closed.local_addr().unwrap();
        drop(closed);

        let out = Outbound::from_config(&config(Some(&dead.to_string())), true);
        let err = out
            .connect(Route::DirectThenSocks5, &TargetHost::Ip(dead.ip()), dead.port())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Both { .. }));
    }
}
