//! Redis-backed idempotency store and distributed lock.
//!
//! Both primitives share one Redis instance and one connection handle; the
//! key namespaces keep them apart:
//!
//! - `idempotency:{key}`: terminal outcomes, JSON-encoded, retained for
//!   the configured window (order of a day)
//! - `lock:{key}`: mutual-exclusion markers, retained for the lock ttl
//!   (tens of seconds) so a crashed holder cannot stall the operation
//!   forever
//!
//! # Connection lifecycle
//!
//! The handle is created once at service startup
//! ([`RedisCoordination::connect`]) and injected into whoever needs it.
//! `ConnectionManager` multiplexes and reconnects internally; clones are
//! cheap and share the underlying connection.
//!
//! # Atomicity
//!
//! Lock acquisition is a single `SET key v NX EX ttl`: the set-if-absent
//! and the expiry are one atomic command, so two workers can never both
//! acquire, and a crash between "set" and "expire" cannot leave an
//! immortal lock behind.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use rxflow_core::idempotency::{
    DistributedLock, IdempotencyError, IdempotencyKey, IdempotencyStore,
};
use std::time::Duration;

/// Key prefix for stored outcomes.
const IDEMPOTENCY_PREFIX: &str = "idempotency:";
/// Key prefix for locks.
const LOCK_PREFIX: &str = "lock:";

/// Shared Redis handle for the idempotency store and the lock.
///
/// # Example
///
/// ```no_run
/// use rxflow_redis::RedisCoordination;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let redis = RedisCoordination::connect("redis://127.0.0.1:6379").await?;
/// let store = redis.idempotency_store();
/// let lock = redis.lock();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisCoordination {
    conn: ConnectionManager,
}

impl RedisCoordination {
    /// Connect to Redis and build the shared handle.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Unavailable`] if the client cannot be
    /// created or the connection cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self, IdempotencyError> {
        let client = Client::open(redis_url).map_err(|e| {
            IdempotencyError::Unavailable(format!("failed to create redis client: {e}"))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            IdempotencyError::Unavailable(format!("failed to connect to redis: {e}"))
        })?;
        tracing::info!(url = %redis_url, "connected to redis coordination store");
        Ok(Self { conn })
    }

    /// The idempotency store view of this handle.
    #[must_use]
    pub fn idempotency_store(&self) -> RedisIdempotencyStore {
        RedisIdempotencyStore {
            conn: self.conn.clone(),
        }
    }

    /// The distributed lock view of this handle.
    #[must_use]
    pub fn lock(&self) -> RedisLock {
        RedisLock {
            conn: self.conn.clone(),
        }
    }
}

fn idempotency_key(key: &IdempotencyKey) -> String {
    format!("{IDEMPOTENCY_PREFIX}{key}")
}

fn lock_key(key: &IdempotencyKey) -> String {
    format!("{LOCK_PREFIX}{key}")
}

fn unavailable(op: &str, e: &redis::RedisError) -> IdempotencyError {
    IdempotencyError::Unavailable(format!("redis {op} failed: {e}"))
}

/// Redis-backed [`IdempotencyStore`].
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn has(&self, key: &IdempotencyKey) -> Result<bool, IdempotencyError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(idempotency_key(key))
            .await
            .map_err(|e| unavailable("EXISTS", &e))?;
        Ok(exists)
    }

    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<serde_json::Value>, IdempotencyError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(idempotency_key(key))
            .await
            .map_err(|e| unavailable("GET", &e))?;

        match raw {
            Some(json) => {
                let outcome = serde_json::from_str(&json)
                    .map_err(|e| IdempotencyError::Serialization(e.to_string()))?;
                tracing::debug!(key = %key, "returning stored outcome");
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &IdempotencyKey,
        outcome: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), IdempotencyError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(outcome)
            .map_err(|e| IdempotencyError::Serialization(e.to_string()))?;

        let _: () = conn
            .set_ex(idempotency_key(key), json, ttl.as_secs())
            .await
            .map_err(|e| unavailable("SETEX", &e))?;

        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "operation marked as processed");
        Ok(())
    }
}

/// Redis-backed [`DistributedLock`].
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(
        &self,
        key: &IdempotencyKey,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        let mut conn = self.conn.clone();
        // SET NX EX in one round-trip; the reply is OK on acquisition and
        // nil when another worker holds the lock.
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("SET NX EX", &e))?;

        Ok(reply.is_some())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), IdempotencyError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(lock_key(key))
            .await
            .map_err(|e| unavailable("DEL", &e))?;
        Ok(())
    }
}
