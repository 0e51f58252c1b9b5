//! Cache-aside resolution of session ids to user records.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheAside, CacheStats};
use crate::kv::KvCache;
use crate::record::canonical_id;
use crate::{AuthError, UserRecord, UserStore};

const NAMESPACE: &str = "user";

/// Resolves users through the fast cache, falling back to the durable store.
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    cache: CacheAside<UserRecord>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>, kv: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self {
            store,
            cache: CacheAside::new(kv, NAMESPACE, ttl),
        }
    }

    /// Look a user up by id.
    ///
    /// Invalid ids fail with [`AuthError::InvalidId`] without touching the
    /// cache or store. Unknown users are `Ok(None)` and are never cached.
    pub async fn resolve(&self, id: &str) -> Result<Option<UserRecord>, AuthError> {
        let id = canonical_id(id)?;
        let user = self
            .cache
            .get_or_load(&id, || self.store.get_user(&id))
            .await?;
        if user.is_none() {
            debug!(user = %id, "user not found");
        }
        Ok(user)
    }

    /// Drop the cached copy of `id`. Must follow every write to the store.
    pub async fn invalidate(&self, id: &str) {
        self.cache.invalidate(id).await;
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    /// Store wrapper that counts lookups.
    struct Counting {
        inner: MemoryStore,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl UserStore for Counting {
        async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, AuthError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_user(id).await
        }
        async fn insert_user(&self, r: &UserRecord) -> Result<(), AuthError> {
            self.inner.insert_user(r).await
        }
        async fn update_user_fields(
            &self,
            id: &str,
            u: &crate::UserUpdate,
        ) -> Result<bool, AuthError> {
            self.inner.update_user_fields(id, u).await
        }
        async fn increment_usage(&self, id: &str, b: u64) -> Result<(), AuthError> {
            self.inner.increment_usage(id, b).await
        }
        async fn reset_usage(&self, id: &str) -> Result<bool, AuthError> {
            self.inner.reset_usage(id).await
        }
        async fn delete_user(&self, id: &str) -> Result<bool, AuthError> {
            self.inner.delete_user(id).await
        }
        async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError> {
            self.inner.list_users().await
        }
    }

    fn setup() -> (Arc<Counting>, UserDirectory) {
        let store = Arc::new(Counting {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
        });
        let dir = UserDirectory::new(
            store.clone(),
            Arc::new(MemoryKv::new()),
            Duration::from_secs(3600),
        );
        (store, dir)
    }

    #[tokio::test]
    async fn invalid_id_never_reaches_store() {
        let (store, dir) = setup();
        assert!(matches!(
            dir.resolve("xyz").await,
            Err(AuthError::InvalidId(_))
        ));
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hit_after_first_lookup() {
        let (store, dir) = setup();
        store.insert_user(&UserRecord::new(ID, 0)).await.unwrap();

        assert!(dir.resolve(ID).await.unwrap().is_some());
        assert!(dir.resolve(&ID.to_uppercase()).await.unwrap().is_some());
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_users_visible_immediately() {
        let (store, dir) = setup();
        assert!(dir.resolve(ID).await.unwrap().is_none());
        store.insert_user(&UserRecord::new(ID, 0)).await.unwrap();
        assert!(dir.resolve(ID).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalidate_picks_up_store_changes() {
        let (store, dir) = setup();
        store.insert_user(&UserRecord::new(ID, 0)).await.unwrap();
        dir.resolve(ID).await.unwrap();

        store.increment_usage(ID, 42).await.unwrap();
        assert_eq!(dir.resolve(ID).await.unwrap().unwrap().data_used, 0);

        dir.invalidate(ID).await;
        assert_eq!(dir.resolve(ID).await.unwrap().unwrap().data_used, 42);
    }
}
