//! Per-IP connection throttling.
//!
//! The accept loop only sees [`ConnectionThrottle`]; [`RateLimiter`] is the
//! in-process fixed-window implementation. Another backend (e.g. a shared
//! counter service) can be plugged in without touching the server.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides whether a new connection from `ip` may proceed.
pub trait ConnectionThrottle: Send + Sync {
    fn allow(&self, ip: IpAddr) -> bool;
}

/// Fixed-window counter keyed by client address.
///
/// Windows start at the first connection from an address. Entries whose
/// window has ended are evicted by a background task.
pub struct RateLimiter {
    entries: Arc<Mutex<HashMap<IpAddr, Window>>>,
    max_connections: u32,
    window: Duration,
    shutdown: CancellationToken,
}

#[derive(Clone, Copy)]
struct Window {
    count: u32,
    start: Instant,
}

impl RateLimiter {
    pub fn new(max_connections_per_ip: u32, window_secs: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            max_connections: max_connections_per_ip,
            window: Duration::from_secs(window_secs),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the background eviction task. It stops on [`shutdown`](Self::shutdown)
    /// or when the limiter is dropped.
    pub fn start_cleanup_task(&self, cleanup_interval: Duration) {
        let entries = self.entries.clone();
        let window = self.window;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("rate limiter cleanup task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = evict_expired(&entries, window, Instant::now());
                        if removed > 0 {
                            debug!(removed, "rate limit entries evicted");
                        }
                    }
                }
            }
        });
    }

    pub fn tracked(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut map = self.entries.lock();
        let entry = map.entry(ip).or_insert(Window {
            count: 0,
            start: now,
        });
        if now.duration_since(entry.start) >= self.window {
            entry.count = 0;
            entry.start = now;
        }
        if entry.count >= self.max_connections {
            return false;
        }
        entry.count += 1;
        true
    }
}

impl ConnectionThrottle for RateLimiter {
    fn allow(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn evict_expired(
    entries: &Mutex<HashMap<IpAddr, Window>>,
    window: Duration,
    now: Instant,
) -> usize {
    let mut map = entries.lock();
    let before = map.len();
    map.retain(|_, w| now.duration_since(w.start) < window);
    before - map.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit() {
        let limiter = RateLimiter::new(5, 60);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.allow(ip));
        }
        assert!(!limiter.allow(ip));
    }

    #[test]
    fn addresses_are_independent() {
        let limiter = RateLimiter::new(2, 60);
        let ip1: IpAddr = "127.0.0.1".parse().unwrap();
        let ip2: IpAddr = "::1".parse().unwrap();

        assert!(limiter.allow(ip1));
        assert!(limiter.allow(ip1));
        assert!(!limiter.allow(ip1));

        assert!(limiter.allow(ip2));
        assert!(limiter.allow(ip2));
        assert!(!limiter.allow(ip2));
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, 10);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let t0 = Instant::now();

        assert!(limiter.check_at(ip, t0));
        assert!(!limiter.check_at(ip, t0 + Duration::from_secs(9)));
        assert!(limiter.check_at(ip, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn eviction_drops_finished_windows() {
        let limiter = RateLimiter::new(3, 10);
        let t0 = Instant::now();
        limiter.check_at("10.0.0.1".parse().unwrap(), t0);
        limiter.check_at("10.0.0.2".parse().unwrap(), t0 + Duration::from_secs(8));
        assert_eq!(limiter.tracked(), 2);

        let removed = evict_expired(&limiter.entries, limiter.window, t0 + Duration::from_secs(12));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn usable_as_trait_object() {
        let throttle: Arc<dyn ConnectionThrottle> = Arc::new(RateLimiter::new(1, 60));
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        assert!(throttle.allow(ip));
        assert!(!throttle.allow(ip));
    }
}
