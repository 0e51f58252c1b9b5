//! User directory, access gate and usage accounting for the vless tunnel.
//!
//! The pieces, leaves first:
//!
//! - [`UserStore`]: durable records ([`MemoryStore`], [`sql::SqlStore`])
//! - [`KvCache`]: fast TTL cache ([`MemoryKv`]) behind a typed [`CacheAside`]
//! - [`UserDirectory`]: cache-aside lookup of records by session id
//! - [`AccessGate`]: expiry, quota and concurrent-address checks
//! - [`UsagePersister`]: write-back of session traffic
//! - [`UserAdmin`]: CRUD and usage reset, invalidating the cache on each write
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vless_auth::{AuthServices, AuthSettings, MemoryKv, MemoryStore, SystemClock};
//!
//! let services = AuthServices::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryKv::new()),
//!     Arc::new(SystemClock),
//!     AuthSettings::default(),
//! );
//! # let _ = services;
//! ```

mod active_ips;
mod admin;
mod cache;
mod clock;
mod directory;
mod error;
mod gate;
mod kv;
mod record;
mod store;
mod units;
mod usage;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "sql")]
pub mod sql;

use std::sync::Arc;
use std::time::Duration;

use vless_core::defaults::{
    DEFAULT_ACTIVE_IP_ENTRY_TTL_SECS, DEFAULT_ACTIVE_IP_SET_TTL_SECS, DEFAULT_USER_CACHE_TTL_SECS,
};

pub use active_ips::ActiveIpRegistry;
pub use admin::{NewUser, UserAdmin};
pub use cache::{CacheAside, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::UserDirectory;
pub use error::AuthError;
pub use gate::{AccessGate, Deny, check_quota};
pub use kv::{KvCache, MemoryKv};
pub use record::{UserRecord, UserUpdate, canonical_id, format_expiration};
pub use store::{MemoryStore, UserStore};
pub use units::{format_bytes, parse_bytes};
pub use usage::UsagePersister;

#[cfg(feature = "cli")]
pub use cli::UsersArgs;

/// TTLs for the cache-backed pieces.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub user_cache_ttl: Duration,
    pub ip_entry_ttl: Duration,
    pub ip_set_ttl: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            user_cache_ttl: Duration::from_secs(DEFAULT_USER_CACHE_TTL_SECS),
            ip_entry_ttl: Duration::from_secs(DEFAULT_ACTIVE_IP_ENTRY_TTL_SECS),
            ip_set_ttl: Duration::from_secs(DEFAULT_ACTIVE_IP_SET_TTL_SECS),
        }
    }
}

/// The auth components wired over one store, one cache and one clock.
#[derive(Clone)]
pub struct AuthServices {
    pub directory: Arc<UserDirectory>,
    pub gate: Arc<AccessGate>,
    pub usage: Arc<UsagePersister>,
    pub admin: Arc<UserAdmin>,
}

impl AuthServices {
    pub fn new(
        store: Arc<dyn UserStore>,
        kv: Arc<dyn KvCache>,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> Self {
        let directory = Arc::new(UserDirectory::new(
            store.clone(),
            kv.clone(),
            settings.user_cache_ttl,
        ));
        let active_ips = ActiveIpRegistry::new(
            kv,
            clock.clone(),
            settings.ip_entry_ttl,
            settings.ip_set_ttl,
        );
        Self {
            gate: Arc::new(AccessGate::new(active_ips, clock.clone())),
            usage: Arc::new(UsagePersister::new(store.clone(), directory.clone())),
            admin: Arc::new(UserAdmin::new(store, directory.clone(), clock)),
            directory,
        }
    }
}
