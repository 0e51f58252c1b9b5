//! Server error types.

use vless_auth::AuthError;
use vless_metrics::{
    ERROR_AUTH, ERROR_CONFIG, ERROR_CONNECT, ERROR_DNS, ERROR_HANDSHAKE, ERROR_IO, ERROR_PROTOCOL,
    ERROR_TIMEOUT,
};
use vless_proto::ParseError;

use crate::dns::DnsError;
use crate::outbound::ConnectError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("config: {0}")]
    Config(String),
    #[error("proto: {0}")]
    Proto(#[from] ParseError),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),
    #[error("dns: {0}")]
    Dns(#[from] DnsError),
    #[error("udp to port {0} is not carried")]
    UnsupportedUdpPort(u16),
    #[error("header timed out")]
    HeaderTimeout,
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Io(_) => ERROR_IO,
            ServerError::Auth(_) => ERROR_AUTH,
            ServerError::Config(_) => ERROR_CONFIG,
            ServerError::Proto(_) | ServerError::UnsupportedUdpPort(_) => ERROR_PROTOCOL,
            ServerError::Handshake(_) => ERROR_HANDSHAKE,
            ServerError::Connect(_) => ERROR_CONNECT,
            ServerError::Dns(_) => ERROR_DNS,
            ServerError::HeaderTimeout => ERROR_TIMEOUT,
        }
    }
}
