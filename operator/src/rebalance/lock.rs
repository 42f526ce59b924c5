use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::key::ResourceKey;
use crate::util::Error;

/// A held per-resource lock. Dropping it releases the lock.
pub type LockGuard = OwnedMutexGuard<()>;

/// Per-(namespace,name) mutual exclusion with a timeout (§4.4), so
/// concurrent watch callbacks and poll ticks for the same resource
/// serialize instead of racing.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<ResourceKey, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, waiting at most `timeout`. On timeout
    /// returns [`Error::Concurrency`] (the ConcurrencyError kind of §7) so
    /// the caller can drop the event and let a later watch resync or
    /// periodic sweep retry (§4.4).
    pub async fn acquire(&self, key: ResourceKey, timeout: Duration) -> Result<LockGuard, Error> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| Error::Concurrency(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ResourceKey {
        ResourceKey {
            namespace: "ns".to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquire_times_out_while_the_first_holder_is_still_in() {
        let registry = Arc::new(LockRegistry::new());
        let guard = registry.acquire(key("r1"), Duration::from_secs(5)).await.unwrap();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire(key("r1"), Duration::from_millis(500)).await });

        tokio::time::advance(Duration::from_millis(600)).await;
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Concurrency(_))));

        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn release_unblocks_a_waiting_acquire() {
        let registry = Arc::new(LockRegistry::new());
        let guard = registry.acquire(key("r1"), Duration::from_secs(5)).await.unwrap();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire(key("r1"), Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn distinct_keys_never_contend() {
        let registry = LockRegistry::new();
        let a = registry.acquire(key("a"), Duration::from_millis(50)).await;
        let b = registry.acquire(key("b"), Duration::from_millis(50)).await;
        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
