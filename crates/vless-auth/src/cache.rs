//! Cache-aside over a [`KvCache`].
//!
//! One typed view per entity: values are bincode-encoded under
//! `"{namespace}:{id}"`. Cache failures never fail a lookup; a broken or
//! undecodable entry reads as a miss and the loader runs.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::AuthError;
use crate::kv::KvCache;

/// Hit/miss counters for one cache view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct CacheAside<T> {
    kv: Arc<dyn KvCache>,
    namespace: &'static str,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    _value: PhantomData<fn() -> T>,
}

impl<T> CacheAside<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(kv: Arc<dyn KvCache>, namespace: &'static str, ttl: Duration) -> Self {
        Self {
            kv,
            namespace,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            _value: PhantomData,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.namespace, id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, if present and decodable.
    pub async fn get(&self, id: &str) -> Option<T> {
        let key = self.key(id);
        let raw = match self.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match bincode::deserialize(&raw) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "discarding undecodable cache entry");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Return the cached value or run `load`; a loaded `Some` is cached,
    /// a loaded `None` is not.
    pub async fn get_or_load<F, Fut>(&self, id: &str, load: F) -> Result<Option<T>, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, AuthError>>,
    {
        if let Some(value) = self.get(id).await {
            return Ok(Some(value));
        }
        let loaded = load().await?;
        if let Some(value) = &loaded {
            self.put(id, value).await;
        }
        Ok(loaded)
    }

    /// Store `value` with the view's TTL.
    pub async fn put(&self, id: &str, value: &T) {
        self.put_with_ttl(id, value, self.ttl).await;
    }

    pub async fn put_with_ttl(&self, id: &str, value: &T, ttl: Duration) {
        let key = self.key(id);
        let raw = match bincode::serialize(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "cache encode failed");
                return;
            }
        };
        if let Err(e) = self.kv.put(&key, raw, ttl).await {
            warn!(key = %key, error = %e, "cache write failed");
        }
    }

    pub async fn invalidate(&self, id: &str) {
        let key = self.key(id);
        if let Err(e) = self.kv.delete(&key).await {
            warn!(key = %key, error = %e, "cache invalidate failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use std::sync::atomic::AtomicUsize;

    fn view(kv: Arc<MemoryKv>) -> CacheAside<String> {
        CacheAside::new(kv, "t", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn loads_once_then_hits() {
        let cache = view(Arc::new(MemoryKv::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cache
                .get_or_load("x", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("value".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(v.as_deref(), Some("value"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1 });
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let cache = view(Arc::new(MemoryKv::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let v = cache
                .get_or_load("x", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert!(v.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undecodable_entry_is_a_miss() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("t:x", vec![0xff], Duration::from_secs(60)).await.unwrap();
        let cache = view(kv);

        let v = cache
            .get_or_load("x", || async { Ok(Some("fresh".to_string())) })
            .await
            .unwrap();
        assert_eq!(v.as_deref(), Some("fresh"));
        assert_eq!(cache.get("x").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let cache = view(Arc::new(MemoryKv::new()));
        cache.put("x", &"old".to_string()).await;
        cache.invalidate("x").await;
        let v = cache
            .get_or_load("x", || async { Ok(Some("new".to_string())) })
            .await
            .unwrap();
        assert_eq!(v.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn loader_errors_propagate() {
        let cache = view(Arc::new(MemoryKv::new()));
        let err = cache
            .get_or_load("x", || async { Err(AuthError::backend("db down")) })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Backend(_)));
    }
}
