//! Stream Leader Election
//!
//! Exactly one instance in the cluster may hold the quote stream open; the
//! provider tears down duplicate sessions. Ownership is an advisory lock in
//! the shared store: the owner renews it on a fixed cadence, standbys poll
//! for it, and a crashed owner's claim lapses via TTL so a standby can take
//! over without operator action.

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{CoordinationStore, StoreError};
use crate::infrastructure::coordination::DistributedLock;

/// Election timing policy.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Shared-store key of the ownership lock.
    pub lock_key: String,
    /// Ownership TTL; a crashed owner is replaced within this window.
    pub lock_ttl: Duration,
    /// How often the owner renews its claim.
    pub renew_interval: Duration,
    /// How often a standby re-attempts acquisition.
    pub standby_poll_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lock_key: "questrade:stream:owner".to_string(),
            lock_ttl: Duration::from_secs(15),
            renew_interval: Duration::from_secs(10),
            standby_poll_interval: Duration::from_secs(10),
        }
    }
}

/// This instance's handle on the stream-ownership election.
#[derive(Debug, Clone)]
pub struct StreamLeaderElector {
    lock: DistributedLock,
    config: ElectionConfig,
}

impl StreamLeaderElector {
    /// Create an elector. `instance_id` is this instance's owner marker.
    #[must_use]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: ElectionConfig,
        instance_id: &str,
    ) -> Self {
        let lock = DistributedLock::new(
            store,
            config.lock_key.clone(),
            instance_id,
            config.lock_ttl,
        );
        Self { lock, config }
    }

    /// Try to become (or remain) the stream owner.
    pub async fn try_acquire(&self) -> Result<bool, StoreError> {
        let acquired = self.lock.try_acquire().await?;
        if acquired {
            tracing::debug!(owner = %self.lock.owner(), "Holding stream ownership");
        }
        Ok(acquired)
    }

    /// Renew ownership. `false` means the claim was lost.
    pub async fn renew(&self) -> Result<bool, StoreError> {
        self.lock.renew().await
    }

    /// Relinquish ownership so a standby can take over immediately.
    pub async fn release(&self) -> Result<(), StoreError> {
        tracing::info!(owner = %self.lock.owner(), "Releasing stream ownership");
        self.lock.release().await
    }

    /// Election timing policy.
    #[must_use]
    pub const fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// This instance's owner marker.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        self.lock.owner()
    }
}

// =============================================================================
// Tests
// =============================================================================
