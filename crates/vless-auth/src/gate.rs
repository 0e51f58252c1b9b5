//! Session authorization: expiry, byte quota and concurrent-address cap.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::UserRecord;
use crate::active_ips::ActiveIpRegistry;
use crate::clock::Clock;

/// Why a session was refused or cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Deny {
    #[error("no such user")]
    NoSuchUser,
    #[error("account expired")]
    Expired,
    #[error("data quota exceeded")]
    QuotaExceeded,
    #[error("too many concurrent client addresses")]
    TooManyConcurrentIps,
}

impl Deny {
    /// Machine-readable reason, used as the close reason and metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Deny::NoSuchUser => "no_such_user",
            Deny::Expired => "expired",
            Deny::QuotaExceeded => "quota_exceeded",
            Deny::TooManyConcurrentIps => "too_many_ips",
        }
    }
}

/// Live quota check, run for every relayed chunk.
#[inline]
pub fn check_quota(user: &UserRecord, session_bytes: u64) -> Result<(), Deny> {
    if user.over_quota(session_bytes) {
        Err(Deny::QuotaExceeded)
    } else {
        Ok(())
    }
}

pub struct AccessGate {
    active_ips: ActiveIpRegistry,
    clock: Arc<dyn Clock>,
}

impl AccessGate {
    pub fn new(active_ips: ActiveIpRegistry, clock: Arc<dyn Clock>) -> Self {
        Self { active_ips, clock }
    }

    /// Full check at session setup. Checks short-circuit in order: user,
    /// expiry, quota, then the address cap (which registers `client` on success).
    pub async fn authorize(
        &self,
        user: Option<&UserRecord>,
        session_bytes: u64,
        client: IpAddr,
    ) -> Result<(), Deny> {
        let user = user.ok_or(Deny::NoSuchUser)?;
        if user.is_expired(self.clock.now()) {
            return Err(Deny::Expired);
        }
        check_quota(user, session_bytes)?;
        if !self.active_ips.admit(&user.id, client, user.ip_limit).await {
            debug!(user = %user.id, client = %client, limit = user.ip_limit, "address cap reached");
            return Err(Deny::TooManyConcurrentIps);
        }
        Ok(())
    }

    /// Keep `client`'s registration alive for a long-running session.
    pub async fn renew(&self, user: &UserRecord, client: IpAddr) {
        if !self.active_ips.admit(&user.id, client, user.ip_limit).await {
            debug!(user = %user.id, client = %client, "registration lost to other addresses");
        }
    }

    pub fn active_ips(&self) -> &ActiveIpRegistry {
        &self.active_ips
    }
}
