//! Write-back of session traffic to the durable store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{UserDirectory, UserStore};

/// Commits per-session byte counts: atomic increment, then cache invalidation.
pub struct UsagePersister {
    store: Arc<dyn UserStore>,
    directory: Arc<UserDirectory>,
}

impl UsagePersister {
    pub fn new(store: Arc<dyn UserStore>, directory: Arc<UserDirectory>) -> Self {
        Self { store, directory }
    }

    /// Add `bytes` to the user's durable usage.
    ///
    /// Failures are logged and dropped; the session is already gone and a lost
    /// increment only under-counts. Returns whether the increment landed.
    pub async fn commit(&self, user_id: &str, bytes: u64) -> bool {
        if bytes == 0 {
            return true;
        }
        match self.store.increment_usage(user_id, bytes).await {
            Ok(()) => {
                self.directory.invalidate(user_id).await;
                debug!(user = %user_id, bytes, "usage committed");
                true
            }
            Err(e) => {
                warn!(user = %user_id, bytes, error = %e, "failed to persist usage");
                false
            }
        }
    }
}
