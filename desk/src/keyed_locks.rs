//! Async mutual exclusion per key.
//!
//! Used per client (limit evaluation plus transaction creation) and per
//! currency (quote fan-out, plus the submissions and settlements that must
//! land on one side of it).

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Guard held while a key is locked.
pub type KeyGuard = OwnedMutexGuard<()>;

/// A table of async mutexes, created lazily per key.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
    /// Label used in logs.
    kind: &'static str,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            locks: DashMap::new(),
            kind,
        }
    }

    fn mutex(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until `key` is free and lock it.
    pub async fn lock(&self, key: &K) -> KeyGuard {
        let mutex = self.mutex(key);
        let guard = mutex.lock_owned().await;
        debug!(kind = self.kind, key = %key, "Lock acquired");
        guard
    }

    /// Lock several keys in sorted order, so multi-key holders cannot
    /// deadlock with each other or with single-key holders.
    pub async fn lock_all(&self, keys: &[K]) -> Vec<KeyGuard>
    where
        K: Ord,
    {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Every key seen so far.
    pub fn keys(&self) -> Vec<K> {
        self.locks.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of keys seen.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Forget `key` once nobody holds or waits on it. Holders and waiters
    /// each own a clone of the mutex, and the table lookup takes the same
    /// shard lock as the removal, so a key in use is never dropped.
    pub fn release(&self, key: &K) {
        if self
            .locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1)
            .is_some()
        {
            debug!(kind = self.kind, key = %key, "Lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn is_free(locks: &KeyedLocks<String>, key: &str) -> bool {
        locks.mutex(&key.to_string()).try_lock_owned().is_ok()
    }

    #[tokio::test]
    async fn test_same_key_excludes() {
        let locks = KeyedLocks::new("client");
        let key = "client-1".to_string();

        let guard = locks.lock(&key).await;
        assert!(!is_free(&locks, "client-1"));
        drop(guard);
        assert!(is_free(&locks, "client-1"));
    }

    #[tokio::test]
    async fn test_different_keys_independent() {
        let locks = KeyedLocks::new("client");
        let _a = locks.lock(&"a".to_string()).await;
        assert!(is_free(&locks, "b"));
    }

    #[tokio::test]
    async fn test_waiter_times_out_while_held() {
        let locks = KeyedLocks::new("client");
        let key = "client-1".to_string();
        let _held = locks.lock(&key).await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock(&key)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_lock_all_dedups() {
        let locks = KeyedLocks::new("currency");
        let keys = vec!["USD".to_string(), "EUR".to_string(), "USD".to_string()];

        let guards = locks.lock_all(&keys).await;
        assert_eq!(guards.len(), 2);
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_held_keys() {
        let locks = KeyedLocks::new("client");
        let a = "a".to_string();
        let b = "b".to_string();

        let held = locks.lock(&a).await;
        drop(locks.lock(&b).await);

        locks.release(&a);
        locks.release(&b);
        assert_eq!(locks.keys(), vec![a.clone()]);

        drop(held);
        locks.release(&a);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_release_keeps_waited_on_keys() {
        let locks = Arc::new(KeyedLocks::new("client"));
        let key = "client-1".to_string();
        let held = locks.lock(&key).await;

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release(&key);
        assert_eq!(locks.len(), 1);

        drop(held);
        waiter.await.unwrap();
        locks.release(&key);
        assert!(locks.is_empty());
    }
}
