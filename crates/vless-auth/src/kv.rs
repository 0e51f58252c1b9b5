//! Fast key/value cache with per-entry TTL.
//!
//! The tunnel only needs `get`, `put(ttl)` and `delete`; [`MemoryKv`] covers a
//! single node, and a networked cache can be dropped in behind [`KvCache`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::AuthError;
use crate::clock::{Clock, SystemClock};

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AuthError>;
    async fn delete(&self, key: &str) -> Result<(), AuthError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: OffsetDateTime,
}

/// In-process [`KvCache`]. Expired entries are dropped lazily on read and by
/// [`MemoryKv::purge_expired`], which [`MemoryKv::start_cleanup_task`] runs periodically.
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Sweep expired entries every `interval` until the cache is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let kv = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(kv) = kv.upgrade() else {
                    debug!("cache cleanup task stopping");
                    break;
                };
                let removed = kv.purge_expired();
                if removed > 0 {
                    debug!(removed, "expired cache entries purged");
                }
            }
        })
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvCache for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(e) if e.expires_at > now => return Ok(Some(e.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // A put may have landed since the read lock was released.
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(e) if e.expires_at > now => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AuthError> {
        let ttl = time::Duration::try_from(ttl).map_err(AuthError::backend)?;
        let expires_at = self.clock.now().saturating_add(ttl);
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
