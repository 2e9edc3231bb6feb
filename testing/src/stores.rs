//! In-memory idempotency store and distributed lock.
//!
//! Both honor ttls against real (tokio-pausable) time and expose an
//! unavailability switch so tests can drive the requeue-on-infrastructure-
//! failure paths.

use async_trait::async_trait;
use rxflow_core::idempotency::{
    DistributedLock, IdempotencyError, IdempotencyKey, IdempotencyStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    outcome: serde_json::Value,
    expires_at: Instant,
}

/// In-memory [`IdempotencyStore`].
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the store into (or out of) an unavailable state; every
    /// operation then fails with [`IdempotencyError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), IdempotencyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdempotencyError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, IdempotencyError> {
        self.entries
            .lock()
            .map_err(|_| IdempotencyError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn has(&self, key: &IdempotencyKey) -> Result<bool, IdempotencyError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<serde_json::Value>, IdempotencyError> {
        self.check_available()?;
        let mut entries = self.lock_entries()?;
        match entries.get(key.as_str()) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.outcome.clone())),
            Some(_) => {
                entries.remove(key.as_str());
                Ok(None)
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
        self.check_available()?;
        let mut entries = self.lock_entries()?;
        entries.insert(
            key.as_str().to_string(),
            Entry {
                outcome: outcome.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// In-memory [`DistributedLock`].
#[derive(Clone, Default)]
pub struct InMemoryLock {
    locks: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryLock {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held (unexpired).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (test-only code).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn is_held(&self, key: &IdempotencyKey) -> bool {
        let locks = self.locks.lock().unwrap();
        locks
            .get(key.as_str())
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    fn lock_table(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Instant>>, IdempotencyError> {
        self.locks
            .lock()
            .map_err(|_| IdempotencyError::Unavailable("lock table poisoned".to_string()))
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(
        &self,
        key: &IdempotencyKey,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        let mut locks = self.lock_table()?;
        let now = Instant::now();
        match locks.get(key.as_str()) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                locks.insert(key.as_str().to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), IdempotencyError> {
        let mut locks = self.lock_table()?;
        // Absence is fine; the lock may have expired already.
        locks.remove(key.as_str());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use rxflow_core::prescription::PrescriptionId;

    fn key() -> IdempotencyKey {
        IdempotencyKey::for_create(&PrescriptionId::new("RX1"))
    }

    #[tokio::test]
    async fn put_then_get_returns_the_outcome() {
        let store = InMemoryIdempotencyStore::new();
        let outcome = serde_json::json!({"success": true});

        store
            .put(&key(), &outcome, Duration::from_secs(60))
            .await
            .expect("put succeeds");

        assert!(store.has(&key()).await.expect("has succeeds"));
        assert_eq!(
            store.get(&key()).await.expect("get succeeds"),
            Some(outcome)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let store = InMemoryIdempotencyStore::new();
        store
            .put(&key(), &serde_json::json!(1), Duration::from_secs(5))
            .await
            .expect("put succeeds");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get(&key()).await.expect("get succeeds"), None);
    }

    #[tokio::test]
    async fn unavailable_store_fails_distinctly() {
        let store = InMemoryIdempotencyStore::new();
        store.set_unavailable(true);

        let err = store.get(&key()).await.expect_err("store is down");
        assert!(matches!(err, IdempotencyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let lock = InMemoryLock::new();
        assert!(
            lock.acquire(&key(), Duration::from_secs(30))
                .await
                .expect("acquire succeeds")
        );
        assert!(
            !lock
                .acquire(&key(), Duration::from_secs(30))
                .await
                .expect("second acquire resolves")
        );

        lock.release(&key()).await.expect("release succeeds");
        assert!(
            lock.acquire(&key(), Duration::from_secs(30))
                .await
                .expect("reacquire succeeds")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_locks_are_acquirable() {
        let lock = InMemoryLock::new();
        assert!(
            lock.acquire(&key(), Duration::from_secs(5))
                .await
                .expect("acquire succeeds")
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(
            lock.acquire(&key(), Duration::from_secs(5))
                .await
                .expect("acquire after expiry succeeds")
        );
    }

    #[tokio::test]
    async fn releasing_an_absent_lock_is_not_an_error() {
        let lock = InMemoryLock::new();
        lock.release(&key()).await.expect("release is best-effort");
    }
}
