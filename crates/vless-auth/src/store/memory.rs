//! In-process user store, used for users declared in the config file.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{AuthError, UserRecord, UserStore, UserUpdate};

/// Map-backed [`UserStore`]. Usage survives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<BTreeMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records; a later duplicate id replaces an earlier one.
    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, AuthError> {
        Ok(self.users.read().get(id).cloned())
    }

    async fn insert_user(&self, record: &UserRecord) -> Result<(), AuthError> {
        let mut users = self.users.write();
        if users.contains_key(&record.id) {
            return Err(AuthError::AlreadyExists(record.id.clone()));
        }
        users.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_user_fields(&self, id: &str, update: &UserUpdate) -> Result<bool, AuthError> {
        Ok(match self.users.write().get_mut(id) {
            Some(record) => {
                update.apply(record);
                true
            }
            None => false,
        })
    }

    async fn increment_usage(&self, id: &str, bytes: u64) -> Result<(), AuthError> {
        match self.users.write().get_mut(id) {
            Some(record) => {
                record.data_used = record.data_used.saturating_add(bytes);
                Ok(())
            }
            None => Err(AuthError::NotFound),
        }
    }

    async fn reset_usage(&self, id: &str) -> Result<bool, AuthError> {
        Ok(match self.users.write().get_mut(id) {
            Some(record) => {
                record.data_used = 0;
                true
            }
            None => false,
        })
    }

    async fn delete_user(&self, id: &str) -> Result<bool, AuthError> {
        Ok(self.users.write().remove(id).is_some())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError> {
        Ok(self.users.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    #[tokio::test]
    async fn crud_and_usage() {
        let store = MemoryStore::new();
        store.insert_user(&UserRecord::new(ID, 1)).await.unwrap();
        assert!(matches!(
            store.insert_user(&UserRecord::new(ID, 2)).await,
            Err(AuthError::AlreadyExists(_))
        ));

        store.increment_usage(ID, 10).await.unwrap();
        store.increment_usage(ID, 5).await.unwrap();
        assert_eq!(store.get_user(ID).await.unwrap().unwrap().data_used, 15);

        let update = UserUpdate {
            ip_limit: Some(2),
            ..Default::default()
        };
        assert!(store.update_user_fields(ID, &update).await.unwrap());
        assert!(store.reset_usage(ID).await.unwrap());
        let rec = store.get_user(ID).await.unwrap().unwrap();
        assert_eq!((rec.ip_limit, rec.data_used, rec.created_at), (2, 0, 1));

        assert!(store.delete_user(ID).await.unwrap());
        assert!(!store.delete_user(ID).await.unwrap());
        assert!(store.get_user(ID).await.unwrap().is_none());
        assert!(matches!(store.increment_usage(ID, 1).await, Err(AuthError::NotFound)));
    }
}
