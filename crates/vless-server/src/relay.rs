//! Per-session traffic accounting.
//!
//! [`SessionMeter`] observes every relayed chunk, enforces the quota against
//! the user snapshot taken at setup and keeps a flushed watermark so usage can
//! be committed in slices while the session runs.

use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;
use vless_auth::{UserRecord, check_quota};
use vless_core::io::{Direction, RelayObserver, Verdict};
use vless_metrics::{
    record_bytes_downlink, record_bytes_uplink, record_persist_failure, record_quota_cutoff,
};

use crate::state::ServerState;

pub struct SessionMeter {
    user: UserRecord,
    total: AtomicU64,
    uplink: AtomicU64,
    downlink: AtomicU64,
    flushed: AtomicU64,
}

impl SessionMeter {
    pub fn new(user: UserRecord) -> Self {
        Self {
            user,
            total: AtomicU64::new(0),
            uplink: AtomicU64::new(0),
            downlink: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
        }
    }

    pub fn user(&self) -> &UserRecord {
        &self.user
    }

    /// Bytes forwarded so far, both directions.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn uplink(&self) -> u64 {
        self.uplink.load(Ordering::Relaxed)
    }

    pub fn downlink(&self) -> u64 {
        self.downlink.load(Ordering::Relaxed)
    }

    /// Bytes counted but not yet committed.
    pub fn unflushed(&self) -> u64 {
        self.total() - self.flushed.load(Ordering::Relaxed)
    }

    /// Commit everything counted since the last successful commit.
    ///
    /// A failed commit leaves the watermark alone so the delta rides along
    /// with the next one.
    pub async fn flush(&self, state: &ServerState) -> bool {
        let total = self.total();
        let delta = total - self.flushed.load(Ordering::Relaxed);
        if delta == 0 {
            return true;
        }
        if state.auth.usage.commit(&self.user.id, delta).await {
            self.flushed.store(total, Ordering::Relaxed);
            true
        } else {
            record_persist_failure();
            false
        }
    }
}

impl RelayObserver for SessionMeter {
    fn on_chunk(&self, direction: Direction, bytes: u64) -> Verdict {
        let next = self.total().saturating_add(bytes);
        if let Err(deny) = check_quota(&self.user, next) {
            debug!(user = %self.user.id, session_bytes = next, "quota reached mid-session");
            record_quota_cutoff();
            return Verdict::Cutoff(deny.reason());
        }
        self.total.store(next, Ordering::Relaxed);
        match direction {
            Direction::Uplink => {
                self.uplink.fetch_add(bytes, Ordering::Relaxed);
                record_bytes_uplink(bytes);
            }
            Direction::Downlink => {
                self.downlink.fetch_add(bytes, Ordering::Relaxed);
                record_bytes_downlink(bytes);
            }
        }
        Verdict::Forward
    }
}

/// Drive `session` while periodically committing usage and renewing the
/// client's active-address entry.
///
/// Renewal runs on its own ticker so the address stays registered however
/// long the flush interval is.
pub async fn with_usage_flush<F>(
    state: &ServerState,
    meter: &SessionMeter,
    client: IpAddr,
    session: F,
) -> F::Output
where
    F: Future,
{
    let start = Instant::now();
    let mut flush = interval_at(start + state.usage_flush_interval, state.usage_flush_interval);
    let mut renew = interval_at(start + state.ip_renew_interval, state.ip_renew_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(session);
    loop {
        tokio::select! {
            out = &mut session => return out,
            _ = flush.tick() => {
                meter.flush(state).await;
            }
            _ = renew.tick() => {
                state.auth.gate.renew(meter.user(), client).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vless_auth::{
        AuthServices, AuthSettings, Clock, Deny, ManualClock, MemoryKv, MemoryStore, SystemClock,
    };

    fn user(cap: u64, used: u64) -> UserRecord {
        let mut u = UserRecord::new("8c1f4b0e-9a57-4d38-9c39-3b0b6f5a2f10", 0);
        u.data_cap = cap;
        u.data_used = used;
        u
    }

    #[test]
    fn counts_forwarded_chunks() {
        let meter = SessionMeter::new(user(0, 0));
        assert_eq!(meter.on_chunk(Direction::Uplink, 100), Verdict::Forward);
        assert_eq!(meter.on_chunk(Direction::Downlink, 250), Verdict::Forward);
        assert_eq!(meter.total(), 350);
        assert_eq!((meter.uplink(), meter.downlink()), (100, 250));
        assert_eq!(meter.unflushed(), 350);
    }

    #[test]
    fn cuts_off_before_crossing_the_cap() {
        // 1000 cap, 900 already used: reaching the cap is already over.
        let meter = SessionMeter::new(user(1000, 900));
        assert_eq!(meter.on_chunk(Direction::Downlink, 60), Verdict::Forward);
        assert_eq!(meter.on_chunk(Direction::Downlink, 39), Verdict::Forward);
        assert_eq!(
            meter.on_chunk(Direction::Uplink, 1),
            Verdict::Cutoff("quota_exceeded")
        );
        // The refused chunk is not counted.
        assert_eq!(meter.total(), 99);
    }

    fn state_with_clock(clock: &ManualClock) -> ServerState {
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let auth = AuthServices::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryKv::with_clock(shared.clone())),
            shared,
            AuthSettings {
                ip_entry_ttl: Duration::from_secs(65),
                ip_set_ttl: Duration::from_secs(120),
                ..AuthSettings::default()
            },
        );
        let mut state = ServerState::for_tests(auth);
        state.usage_flush_interval = Duration::from_secs(300);
        state.ip_renew_interval = ServerState::renew_interval_for(Duration::from_secs(65));
        state
    }

    #[tokio::test(start_paused = true)]
    async fn long_session_keeps_its_address_registered() {
        let clock = ManualClock::new(SystemClock.now());
        let state = state_with_clock(&clock);
        let mut u = user(0, 0);
        u.expiration_date = Some("2099-12-31".into());
        u.expiration_time = Some("23:59:59".into());
        u.ip_limit = 1;
        let first = IpAddr::from([198, 51, 100, 7]);
        let second = IpAddr::from([203, 0, 113, 9]);

        assert_eq!(state.auth.gate.authorize(Some(&u), 0, first).await, Ok(()));
        let meter = SessionMeter::new(u.clone());

        // Runs for 100s, well past one entry TTL and short of a flush tick.
        let session = async {
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_secs(10)).await;
                clock.advance(Duration::from_secs(10));
            }
            state.auth.gate.authorize(Some(&u), 0, second).await
        };
        let late = with_usage_flush(&state, &meter, first, session).await;
        assert_eq!(late, Err(Deny::TooManyConcurrentIps));
    }

    #[test]
    fn renewal_stays_under_the_entry_ttl() {
        assert_eq!(
            ServerState::renew_interval_for(Duration::from_secs(65)),
            Duration::from_millis(32_500)
        );
        assert_eq!(
            ServerState::renew_interval_for(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn unlimited_cap_never_cuts_off() {
        let meter = SessionMeter::new(user(0, u64::MAX - 1));
        assert_eq!(meter.on_chunk(Direction::Uplink, 1 << 40), Verdict::Forward);
    }
}
