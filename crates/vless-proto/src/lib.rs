//! VLESS request header parsing and response encoding.
//!
//! Wire layout of a request:
//!
//! ```text
//! +---------+------------+---------+---------+---------+------+------+---------+---------+
//! | version | session id | opt len | options | command | port | atyp | address | payload |
//! |    1    |     16     |    1    | opt len |    1    | 2 BE |  1   |   var   |   ...   |
//! +---------+------------+---------+---------+---------+------+------+---------+---------+
//! ```
//!
//! The server answers with a two byte ack `[version, 0]`, optionally followed
//! by payload in the same message. Tunneled DNS datagrams are framed as
//! `[2-byte BE length][bytes]`.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

/// The only version this codec accepts.
pub const VERSION: u8 = 0;
/// Shorter buffers are rejected before any field is read.
pub const MIN_HEADER_LEN: usize = 24;

pub const CMD_TCP: u8 = 0x01;
pub const CMD_UDP: u8 = 0x02;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x02;
pub const ATYP_IPV6: u8 = 0x03;

/// Largest datagram the length prefix can describe.
pub const MAX_UDP_FRAME_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("header truncated")]
    Truncated,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported command {0}")]
    UnsupportedCommand(u8),
    #[error("unsupported address type {0}")]
    UnsupportedAddressType(u8),
    #[error("invalid domain name")]
    InvalidDomain,
}

impl ParseError {
    /// Short machine-readable reason used when closing the transport.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::Truncated => "truncated_header",
            ParseError::UnsupportedVersion(_) => "unsupported_version",
            ParseError::UnsupportedCommand(_) => "unsupported_command",
            ParseError::UnsupportedAddressType(_) => "unsupported_address_type",
            ParseError::InvalidDomain => "invalid_domain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("payload exceeds 65535 bytes")]
    PayloadTooLarge,
    #[error("domain exceeds 255 bytes")]
    DomainTooLong,
}

/// Requested session type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
}

impl Command {
    pub fn from_byte(b: u8) -> Result<Self, ParseError> {
        match b {
            CMD_TCP => Ok(Command::Tcp),
            CMD_UDP => Ok(Command::Udp),
            other => Err(ParseError::UnsupportedCommand(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Command::Tcp => CMD_TCP,
            Command::Udp => CMD_UDP,
        }
    }
}

/// Destination host borrowed from the request buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRef<'a> {
    Ipv4(Ipv4Addr),
    Domain(&'a str),
    Ipv6(Ipv6Addr),
}

impl HostRef<'_> {
    pub fn atyp(&self) -> u8 {
        match self {
            HostRef::Ipv4(_) => ATYP_IPV4,
            HostRef::Domain(_) => ATYP_DOMAIN,
            HostRef::Ipv6(_) => ATYP_IPV6,
        }
    }
}

/// IPv6 is rendered as eight uncompressed hex groups (`2001:db8:0:0:0:0:0:1`).
impl fmt::Display for HostRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRef::Ipv4(ip) => write!(f, "{ip}"),
            HostRef::Domain(d) => f.write_str(d),
            HostRef::Ipv6(ip) => {
                let s = ip.segments();
                write!(
                    f,
                    "{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}:{:x}",
                    s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]
                )
            }
        }
    }
}

/// A decoded request header. `payload_offset` indexes the original buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader<'a> {
    pub version: u8,
    pub session_id: Uuid,
    pub command: Command,
    pub host: HostRef<'a>,
    pub port: u16,
    pub payload_offset: usize,
}

impl RequestHeader<'_> {
    /// Canonical lowercase hyphenated form of the session id.
    pub fn session_id_str(&self) -> String {
        self.session_id.hyphenated().to_string()
    }
}

/// Decode a request header from the first protocol chunk.
///
/// `Truncated` means more bytes are needed; the caller decides whether to wait.
pub fn decode(buf: &[u8]) -> Result<RequestHeader<'_>, ParseError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(ParseError::Truncated);
    }
    let version = buf[0];
    if version != VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }

    let mut id = [0u8; 16];
    id.copy_from_slice(&buf[1..17]);
    let session_id = Uuid::from_bytes(id);

    let opt_len = buf[17] as usize;
    let mut offset = 18 + opt_len;

    let command = Command::from_byte(*buf.get(offset).ok_or(ParseError::Truncated)?)?;
    offset += 1;

    let port_bytes = buf.get(offset..offset + 2).ok_or(ParseError::Truncated)?;
    let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
    offset += 2;

    let atyp = *buf.get(offset).ok_or(ParseError::Truncated)?;
    offset += 1;

    let (host, addr_len) = decode_host(atyp, &buf[offset..])?;
    offset += addr_len;

    Ok(RequestHeader {
        version,
        session_id,
        command,
        host,
        port,
        payload_offset: offset,
    })
}

fn decode_host(atyp: u8, buf: &[u8]) -> Result<(HostRef<'_>, usize), ParseError> {
    match atyp {
        ATYP_IPV4 => {
            let b = buf.get(..4).ok_or(ParseError::Truncated)?;
            Ok((HostRef::Ipv4(Ipv4Addr::new(b[0], b[1], b[2], b[3])), 4))
        }
        ATYP_DOMAIN => {
            let len = *buf.first().ok_or(ParseError::Truncated)? as usize;
            if len == 0 {
                return Err(ParseError::InvalidDomain);
            }
            let raw = buf.get(1..1 + len).ok_or(ParseError::Truncated)?;
            let domain = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidDomain)?;
            Ok((HostRef::Domain(domain), 1 + len))
        }
        ATYP_IPV6 => {
            let b = buf.get(..16).ok_or(ParseError::Truncated)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            Ok((HostRef::Ipv6(Ipv6Addr::from(octets)), 16))
        }
        other => Err(ParseError::UnsupportedAddressType(other)),
    }
}

/// The two byte response ack.
#[inline]
pub fn ack(version: u8) -> [u8; 2] {
    [version, 0]
}

/// Encode a request header (client side; used by tooling and tests).
pub fn write_request(
    buf: &mut BytesMut,
    session_id: &Uuid,
    command: Command,
    host: &HostRef<'_>,
    port: u16,
) -> Result<(), WriteError> {
    if let HostRef::Domain(d) = host
        && d.len() > u8::MAX as usize
    {
        return Err(WriteError::DomainTooLong);
    }
    buf.reserve(24 + 256);
    buf.put_u8(VERSION);
    buf.put_slice(session_id.as_bytes());
    buf.put_u8(0);
    buf.put_u8(command.as_byte());
    buf.put_u16(port);
    buf.put_u8(host.atyp());
    match host {
        HostRef::Ipv4(ip) => buf.put_slice(&ip.octets()),
        HostRef::Domain(d) => {
            buf.put_u8(d.len() as u8);
            buf.put_slice(d.as_bytes());
        }
        HostRef::Ipv6(ip) => buf.put_slice(&ip.octets()),
    }
    Ok(())
}

/// Split one length-prefixed datagram off the front of `buf`.
///
/// Returns the payload and the total bytes consumed, or `None` while the
/// frame is still incomplete.
#[inline]
pub fn parse_udp_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    let len_bytes = buf.get(..2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let payload = buf.get(2..2 + len)?;
    Some((payload, 2 + len))
}

/// Append one length-prefixed datagram.
pub fn write_udp_frame(buf: &mut BytesMut, payload: &[u8]) -> Result<(), WriteError> {
    if payload.len() > MAX_UDP_FRAME_PAYLOAD {
        return Err(WriteError::PayloadTooLarge);
    }
    buf.reserve(2 + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(())
}
