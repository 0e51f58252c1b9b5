//! SOCKS5 client used as the secondary outbound route.
//!
//! Only CONNECT is spoken. The greeting offers no-auth, plus username/password
//! (RFC 1929) when credentials are configured.

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::outbound::TargetHost;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_SUBNEG_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

#[derive(Debug, thiserror::Error)]
pub enum Socks5Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected version {0:#04x} in reply")]
    BadVersion(u8),
    #[error("no acceptable auth method")]
    NoAcceptableAuth,
    #[error("server requires credentials")]
    CredentialsRequired,
    #[error("authentication rejected")]
    AuthRejected,
    #[error("connect refused: {}", reply_message(*.0))]
    Reply(u8),
    #[error("unsupported bound address type {0:#04x}")]
    BadAddressType(u8),
    #[error("domain longer than 255 bytes")]
    DomainTooLong,
}

/// Username/password for RFC 1929 sub-negotiation.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A configured SOCKS5 upstream.
#[derive(Debug, Clone)]
pub struct Socks5Upstream {
    pub address: String,
    pub credentials: Option<Credentials>,
}

impl Socks5Upstream {
    /// Connect to the upstream and ask it to CONNECT to `host:port`.
    pub async fn connect(&self, host: &TargetHost, port: u16) -> Result<TcpStream, Socks5Error> {
        let mut stream = TcpStream::connect(self.address.as_str()).await?;
        handshake(&mut stream, self.credentials.as_ref(), host, port).await?;
        Ok(stream)
    }
}

/// Run the client side of the SOCKS5 handshake on an open stream.
pub async fn handshake<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    host: &TargetHost,
    port: u16,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Build the CONNECT request first so an oversize domain fails before any I/O.
    let request = connect_request(host, port)?;

    if credentials.is_some() {
        stream
            .write_all(&[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD])
            .await?;
    } else {
        stream.write_all(&[SOCKS5_VERSION, 1, AUTH_NONE]).await?;
    }

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS5_VERSION {
        return Err(Socks5Error::BadVersion(choice[0]));
    }
    match choice[1] {
        AUTH_NONE => {}
        AUTH_PASSWORD => {
            let creds = credentials.ok_or(Socks5Error::CredentialsRequired)?;
            authenticate(stream, creds).await?;
        }
        // 0xFF: nothing we offered is acceptable
        _ => return Err(Socks5Error::NoAcceptableAuth),
    }

    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(Socks5Error::BadVersion(reply[0]));
    }
    if reply[1] != REP_SUCCESS {
        return Err(Socks5Error::Reply(reply[1]));
    }

    // Skip the bound address
    let skip = match reply[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize + 2
        }
        other => return Err(Socks5Error::BadAddressType(other)),
    };
    let mut bound = [0u8; 255 + 2];
    stream.read_exact(&mut bound[..skip]).await?;
    Ok(())
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = creds.username.as_bytes();
    let pass = creds.password.as_bytes();
    let mut req = Vec::with_capacity(3 + user.len() + pass.len());
    req.push(AUTH_SUBNEG_VERSION);
    req.push(user.len().min(255) as u8);
    req.extend_from_slice(&user[..user.len().min(255)]);
    req.push(pass.len().min(255) as u8);
    req.extend_from_slice(&pass[..pass.len().min(255)]);
    stream.write_all(&req).await?;

    let mut resp = [0u8; 2];
    stream.read_exact(&mut resp).await?;
    if resp[1] != 0x00 {
        return Err(Socks5Error::AuthRejected);
    }
    Ok(())
}

fn connect_request(host: &TargetHost, port: u16) -> Result<Vec<u8>, Socks5Error> {
    let mut req = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    match host {
        TargetHost::Ip(IpAddr::V4(v4)) => {
            req.push(ATYP_IPV4);
            req.extend_from_slice(&v4.octets());
        }
        TargetHost::Ip(IpAddr::V6(v6)) => {
            req.push(ATYP_IPV6);
            req.extend_from_slice(&v6.octets());
        }
        TargetHost::Domain(domain) => {
            let len = u8::try_from(domain.len()).map_err(|_| Socks5Error::DomainTooLong)?;
            req.push(ATYP_DOMAIN);
            req.push(len);
            req.extend_from_slice(domain.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "ttl expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
