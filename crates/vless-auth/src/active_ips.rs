//! Per-user registry of client addresses with self-expiring entries.
//!
//! The whole set for a user lives under one cache key. Updates are a
//! read-modify-write without locking across nodes: concurrent admits may
//! briefly let one extra address through.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheAside;
use crate::clock::Clock;
use crate::kv::KvCache;

const NAMESPACE: &str = "active_ips";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ActiveIp {
    ip: IpAddr,
    /// Unix seconds.
    expires_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ActiveIpSet {
    entries: Vec<ActiveIp>,
}

pub struct ActiveIpRegistry {
    sets: CacheAside<ActiveIpSet>,
    clock: Arc<dyn Clock>,
    entry_ttl: i64,
}

impl ActiveIpRegistry {
    /// `entry_ttl` bounds one registration, `set_ttl` the whole set.
    pub fn new(
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        entry_ttl: Duration,
        set_ttl: Duration,
    ) -> Self {
        Self {
            sets: CacheAside::new(kv, NAMESPACE, set_ttl),
            clock,
            entry_ttl: i64::try_from(entry_ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Register `ip` for `user_id` unless `limit` distinct live addresses are
    /// already registered. A member is always admitted and its entry renewed.
    ///
    /// `limit == 0` admits everything without touching the cache.
    pub async fn admit(&self, user_id: &str, ip: IpAddr, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }
        let now = self.clock.unix_now();
        let mut set = self.sets.get(user_id).await.unwrap_or_default();
        set.entries.retain(|e| e.expires_at > now);

        let expires_at = now.saturating_add(self.entry_ttl);
        if let Some(entry) = set.entries.iter_mut().find(|e| e.ip == ip) {
            entry.expires_at = expires_at;
        } else if set.entries.len() >= limit as usize {
            return false;
        } else {
            set.entries.push(ActiveIp { ip, expires_at });
        }
        self.sets.put(user_id, &set).await;
        true
    }

    /// Live addresses currently registered for `user_id`.
    pub async fn active(&self, user_id: &str) -> Vec<IpAddr> {
        let now = self.clock.unix_now();
        self.sets
            .get(user_id)
            .await
            .map(|set| {
                set.entries
                    .into_iter()
                    .filter(|e| e.expires_at > now)
                    .map(|e| e.ip)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn clear(&self, user_id: &str) {
        self.sets.invalidate(user_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;
    use time::macros::datetime;

    fn registry() -> (ManualClock, ActiveIpRegistry) {
        let clock = ManualClock::new(datetime!(2024-01-01 0:00 UTC));
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let kv = Arc::new(MemoryKv::with_clock(shared.clone()));
        let reg = ActiveIpRegistry::new(
            kv,
            shared,
            Duration::from_secs(65),
            Duration::from_secs(120),
        );
        (clock, reg)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[tokio::test]
    async fn third_address_waits_for_a_lapse() {
        let (clock, reg) = registry();

        assert!(reg.admit("u", ip(1), 2).await);
        clock.advance(Duration::from_secs(30));
        assert!(reg.admit("u", ip(2), 2).await);
        assert!(!reg.admit("u", ip(3), 2).await);
        // Members keep getting in.
        assert!(reg.admit("u", ip(2), 2).await);

        // ip(1) registered at t=0 lapses at t=65; ip(2) was renewed at t=30.
        clock.advance(Duration::from_secs(36));
        assert!(reg.admit("u", ip(3), 2).await);
        assert!(!reg.admit("u", ip(4), 2).await);

        let mut active = reg.active("u").await;
        active.sort();
        assert_eq!(active, vec![ip(2), ip(3)]);
    }

    #[tokio::test]
    async fn zero_limit_is_unlimited() {
        let (_clock, reg) = registry();
        for n in 0..10 {
            assert!(reg.admit("u", ip(n), 0).await);
        }
        assert!(reg.active("u").await.is_empty());
    }

    #[tokio::test]
    async fn users_are_independent() {
        let (_clock, reg) = registry();
        assert!(reg.admit("a", ip(1), 1).await);
        assert!(reg.admit("b", ip(2), 1).await);
        assert!(!reg.admit("a", ip(2), 1).await);
    }

    #[tokio::test]
    async fn whole_set_expires() {
        let (clock, reg) = registry();
        assert!(reg.admit("u", ip(1), 1).await);
        clock.advance(Duration::from_secs(121));
        assert!(reg.active("u").await.is_empty());
        assert!(reg.admit("u", ip(2), 1).await);
    }
}
