//! Durable user storage.
//!
//! [`UserStore`] is the only durable collaborator the tunnel needs. Policy
//! (expiry, caps) lives in [`AccessGate`](crate::AccessGate); stores only
//! read and write records.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::{AuthError, UserRecord, UserUpdate};

/// Data-access layer for user records.
///
/// Identifiers passed in are already canonical. `Ok(None)` / `Ok(false)` mean
/// the user does not exist.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, AuthError>;

    /// Insert a new record. Fails with [`AuthError::AlreadyExists`] on a duplicate id.
    async fn insert_user(&self, record: &UserRecord) -> Result<(), AuthError>;

    async fn update_user_fields(&self, id: &str, update: &UserUpdate) -> Result<bool, AuthError>;

    /// Atomically add `bytes` to `data_used`.
    async fn increment_usage(&self, id: &str, bytes: u64) -> Result<(), AuthError>;

    async fn reset_usage(&self, id: &str) -> Result<bool, AuthError>;

    async fn delete_user(&self, id: &str) -> Result<bool, AuthError>;

    async fn list_users(&self) -> Result<Vec<UserRecord>, AuthError>;
}
