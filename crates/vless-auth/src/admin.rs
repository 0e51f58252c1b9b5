//! Read/write surface for user management.
//!
//! Every write goes to the store first and then drops the cached record, so
//! the next session sees the change.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::record::canonical_id;
use crate::{AuthError, UserDirectory, UserRecord, UserStore, UserUpdate};

/// Fields for a new user. A missing id is generated.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: Option<String>,
    pub expiration_date: Option<String>,
    pub expiration_time: Option<String>,
    pub note: String,
    pub data_cap: u64,
    pub ip_limit: u32,
}

pub struct UserAdmin {
    store: Arc<dyn UserStore>,
    directory: Arc<UserDirectory>,
    clock: Arc<dyn Clock>,
}

impl UserAdmin {
    pub fn new(
        store: Arc<dyn UserStore>,
        directory: Arc<UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
        }
    }

    pub async fn create_user(&self, new: NewUser) -> Result<UserRecord, AuthError> {
        let id = match new.id.as_deref() {
            Some(raw) => canonical_id(raw)?,
            None => Uuid::new_v4().hyphenated().to_string(),
        };
        let fields = UserUpdate {
            expiration_date: new.expiration_date,
            expiration_time: new.expiration_time,
            ..Default::default()
        };
        fields.validate()?;

        let mut record = UserRecord::new(id, self.clock.unix_now());
        fields.apply(&mut record);
        record.note = new.note;
        record.data_cap = new.data_cap;
        record.ip_limit = new.ip_limit;

        self.store.insert_user(&record).await?;
        self.directory.invalidate(&record.id).await;
        Ok(record)
    }

    pub async fn get_user(&self, id: &str) -> Result<UserRecord, AuthError> {
        let id = canonical_id(id)?;
        self.store.get_user(&id).await?.ok_or(AuthError::NotFound)
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError> {
        self.store.list_users().await
    }

    pub async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<UserRecord, AuthError> {
        let id = canonical_id(id)?;
        update.validate()?;
        if !update.is_empty() && !self.store.update_user_fields(&id, update).await? {
            return Err(AuthError::NotFound);
        }
        self.directory.invalidate(&id).await;
        self.store.get_user(&id).await?.ok_or(AuthError::NotFound)
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), AuthError> {
        let id = canonical_id(id)?;
        let removed = self.store.delete_user(&id).await?;
        self.directory.invalidate(&id).await;
        if removed { Ok(()) } else { Err(AuthError::NotFound) }
    }

    pub async fn reset_usage(&self, id: &str) -> Result<(), AuthError> {
        let id = canonical_id(id)?;
        let reset = self.store.reset_usage(&id).await?;
        self.directory.invalidate(&id).await;
        if reset { Ok(()) } else { Err(AuthError::NotFound) }
    }
}
