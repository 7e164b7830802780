//! Redis Coordination Store
//!
//! Production [`CoordinationStore`] adapter over redis. TTLs map to `EX`,
//! create-if-absent maps to `SET .. NX`, so lock acquisition is a single
//! atomic round trip.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::application::ports::{CoordinationStore, StoreError};

/// Redis-backed coordination store.
///
/// The connection manager transparently reconnects, so transient redis
/// outages surface as per-call errors rather than a dead adapter.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
}

impl RedisCoordinationStore {
    /// Connect to redis at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from_source)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::from_source)?;
        Ok(Self { conn })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // Redis EX takes whole seconds; never let a positive TTL round to 0.
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from_source)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(StoreError::from_source)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // NX returns nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from_source)?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let set: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from_source)?;
        Ok(set == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(StoreError::from_source)
    }
}

impl std::fmt::Debug for RedisCoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCoordinationStore").finish_non_exhaustive()
    }
}
