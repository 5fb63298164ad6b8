//! Per-user mutual exclusion
//!
//! Requests for one user are serialized across profile read, scoring,
//! ledger write and profile update. Different users never share a lock.

use crate::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by user
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`
    pub async fn acquire(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Number of users with a lock slot
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// No lock slots yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
