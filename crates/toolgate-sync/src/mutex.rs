//! FIFO async mutex and a keyed pool of them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// A FIFO async lock guarding a critical section rather than data.
///
/// Waiters are served strictly in the order they started waiting. Cloning
/// yields another handle to the same lock.
#[derive(Debug, Clone, Default)]
pub struct Mutex {
    inner: Arc<tokio::sync::Mutex<()>>,
}

/// Exclusive hold on a [`Mutex`]. Dropping it releases the lock and hands it
/// to the next queued waiter.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard {
    _guard: OwnedMutexGuard<()>,
}

impl MutexGuard {
    pub fn release(self) {}
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock. Resolves immediately when it is free.
    pub async fn acquire(&self) -> MutexGuard {
        MutexGuard {
            _guard: self.inner.clone().lock_owned().await,
        }
    }

    pub fn try_acquire(&self) -> Option<MutexGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| MutexGuard { _guard: guard })
    }

    /// Run `critical` while holding the lock.
    ///
    /// The lock is released when the future completes, returns an error,
    /// panics, or is dropped.
    pub async fn with_lock<F, Fut, T>(&self, critical: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire().await;
        critical().await
    }

    /// Point-in-time view; may change before the caller acts on it.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }
}

/// Lazily populated pool of [`Mutex`]es keyed by string.
#[derive(Debug, Default)]
pub struct NamedMutexManager {
    mutexes: parking_lot::Mutex<HashMap<String, Mutex>>,
}

impl NamedMutexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `key`, created on first use.
    pub fn get_mutex(&self, key: &str) -> Mutex {
        let mut mutexes = self.mutexes.lock();
        if let Some(mutex) = mutexes.get(key) {
            return mutex.clone();
        }
        let mutex = Mutex::new();
        mutexes.insert(key.to_owned(), mutex.clone());
        mutex
    }

    pub async fn with_lock<F, Fut, T>(&self, key: &str, critical: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_mutex(key).with_lock(critical).await
    }

    /// Drop every entry that is neither locked nor referenced outside the
    /// pool. Returns how many were dropped.
    ///
    /// Handles obtained earlier stay usable, but once their entry is dropped
    /// a later [`Self::get_mutex`] for the same key returns a fresh lock.
    pub fn cleanup(&self) -> usize {
        let mut mutexes = self.mutexes.lock();
        let before = mutexes.len();
        mutexes.retain(|_, mutex| mutex.is_locked() || mutex.is_shared());
        let removed = before - mutexes.len();
        if removed > 0 {
            debug!(removed, remaining = mutexes.len(), "named mutexes cleaned up");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.mutexes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.lock().is_empty()
    }
}
