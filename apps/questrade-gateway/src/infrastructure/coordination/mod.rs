//! Shared Coordination Store
//!
//! Adapters for the cluster-visible key-value store plus the advisory
//! distributed lock built on top of it. The lock is the only
//! cross-instance mutual-exclusion primitive in the system: it serializes
//! credential rotation and elects the stream owner.
//!
//! Lock lifecycle: create-if-absent with expiry, periodic renewal, explicit
//! release on clean shutdown, implicit release via TTL expiry on crash.

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{CoordinationStore, StoreError};

pub mod memory;
pub mod redis;

pub use memory::InMemoryCoordinationStore;
pub use redis::RedisCoordinationStore;

// =============================================================================
// Distributed Lock
// =============================================================================

/// Advisory mutual-exclusion marker in the shared store.
///
/// Not a transaction: two instances can only disagree about ownership
/// within the TTL-expiry window after an owner crashes, which is the
/// accepted availability/consistency tradeoff.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    owner: String,
    ttl: Duration,
}

impl DistributedLock {
    /// Create a lock handle. `owner` must be unique per instance.
    #[must_use]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        key: impl Into<String>,
        owner: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            owner: owner.into(),
            ttl,
        }
    }

    /// The lock key in the shared store.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// This instance's owner marker.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Try to take the lock.
    ///
    /// Succeeds when the key is absent, or when this instance already holds
    /// it (in which case the TTL is refreshed).
    pub async fn try_acquire(&self) -> Result<bool, StoreError> {
        if self
            .store
            .set_if_absent(&self.key, &self.owner, self.ttl)
            .await?
        {
            return Ok(true);
        }

        // Re-acquisition by the current owner refreshes the TTL.
        if self.held_by_us().await? {
            self.store.expire(&self.key, self.ttl).await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Extend the TTL if this instance still owns the lock.
    ///
    /// Returns `false` when ownership was lost (TTL lapsed and someone else
    /// took over, or the key vanished).
    pub async fn renew(&self) -> Result<bool, StoreError> {
        if !self.held_by_us().await? {
            return Ok(false);
        }
        self.store.expire(&self.key, self.ttl).await
    }

    /// Release the lock immediately if this instance owns it.
    ///
    /// Never deletes another instance's marker.
    pub async fn release(&self) -> Result<(), StoreError> {
        if self.held_by_us().await? {
            self.store.delete(&self.key).await?;
        }
        Ok(())
    }

    async fn held_by_us(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(&self.key).await?.as_deref() == Some(self.owner.as_str()))
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(store: &Arc<InMemoryCoordinationStore>, owner: &str) -> DistributedLock {
        let store: Arc<dyn CoordinationStore> = Arc::clone(store) as _;
        DistributedLock::new(store, "lock:test", owner, Duration::from_secs(15))
    }

    #[tokio::test]
    async fn first_acquirer_wins() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = lock(&store, "instance-a");
        let b = lock(&store, "instance-b");

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn reacquire_by_owner_succeeds() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = lock(&store, "instance-a");

        assert!(a.try_acquire().await.unwrap());
        assert!(a.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_lets_other_instance_acquire() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = lock(&store, "instance-a");
        let b = lock(&store, "instance-b");

        assert!(a.try_acquire().await.unwrap());
        a.release().await.unwrap();
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_never_deletes_foreign_marker() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = lock(&store, "instance-a");
        let b = lock(&store, "instance-b");

        assert!(a.try_acquire().await.unwrap());
        b.release().await.unwrap();
        // A still holds it.
        assert!(!b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn renew_fails_after_loss() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let a = lock(&store, "instance-a");
        let b = lock(&store, "instance-b");

        assert!(a.try_acquire().await.unwrap());
        assert!(a.renew().await.unwrap());

        a.release().await.unwrap();
        assert!(b.try_acquire().await.unwrap());
        assert!(!a.renew().await.unwrap());
    }

    #[tokio::test]
    async fn ttl_expiry_frees_the_lock() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let store_dyn: Arc<dyn CoordinationStore> = Arc::clone(&store) as _;
        let a = DistributedLock::new(
            Arc::clone(&store_dyn),
            "lock:test",
            "instance-a",
            Duration::from_millis(20),
        );
        let b = DistributedLock::new(store_dyn, "lock:test", "instance-b", Duration::from_secs(15));

        assert!(a.try_acquire().await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(b.try_acquire().await.unwrap());
    }
}
