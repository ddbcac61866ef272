//! Named async locks shared by concurrent callers.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one mutex per key, created on first use.
///
/// Calls that touch the same shared fixture (a bucket, an index, a
/// knowledge base) take the lock for its key so they run one at a time,
/// while unrelated keys proceed concurrently.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }

        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`. The lock is held until the guard
    /// is dropped.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self.get_or_create(key);
        log::debug!("acquiring lock '{key}'");
        lock.lock_owned().await
    }

    /// Run `fut` while holding the lock for `key`.
    pub async fn with_lock<F, T>(&self, key: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        fut.await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
