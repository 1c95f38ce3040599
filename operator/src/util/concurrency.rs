use std::{
    collections::HashSet,
    hash::Hash,
    sync::{Arc, Mutex},
};
use tokio::sync::{Notify, Semaphore, SemaphorePermit};

/// Global gate bounding how many PVC data-sync transfers run at once,
/// keyed by `(sourceNamespace, sourcePVCName)` so the same volume is never
/// synced by two overlapping transfers (spec.md §4.4.4 step 1, §5).
///
/// Admission is fair: `tokio::sync::Semaphore` wakes waiters in acquire
/// order, so two reconciles racing for the same global slot are served
/// first-in-first-out.
pub struct ConcurrencyGate<K> {
    semaphore: Semaphore,
    active: Mutex<HashSet<K>>,
    notify: Notify,
}

pub struct Permit<'a, K: Eq + Hash + Clone> {
    gate: &'a ConcurrencyGate<K>,
    key: K,
    _permit: SemaphorePermit<'a>,
}

impl<K: Eq + Hash + Clone> Drop for Permit<'_, K> {
    fn drop(&mut self) {
        self.gate.active.lock().unwrap().remove(&self.key);
        self.gate.notify.notify_waiters();
    }
}

impl<K: Eq + Hash + Clone> ConcurrencyGate<K> {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent),
            active: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    /// Blocks until both a global slot is free and no other transfer holds
    /// `key`, then returns a guard that releases both on drop.
    pub async fn acquire(&self, key: K) -> Permit<'_, K> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("ConcurrencyGate semaphore is never closed");
        loop {
            {
                let mut active = self.active.lock().unwrap();
                if !active.contains(&key) {
                    active.insert(key.clone());
                    break;
                }
            }
            self.notify.notified().await;
        }
        Permit {
            gate: self,
            key,
            _permit: permit,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn caps_global_concurrency() {
        let gate: Arc<ConcurrencyGate<(String, String)>> = Arc::new(ConcurrencyGate::new(1));
        let g1 = gate.acquire(("ns-a".into(), "pvc-a".into())).await;
        let gate2 = gate.clone();
        let handle = tokio::spawn(async move {
            let _g = gate2.acquire(("ns-b".into(), "pvc-b".into())).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(g1);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("second acquire must complete once the first releases")
            .unwrap();
    }

    #[tokio::test]
    async fn serializes_same_key_even_under_global_capacity() {
        let gate: Arc<ConcurrencyGate<(String, String)>> = Arc::new(ConcurrencyGate::new(4));
        let key = ("ns-a".to_string(), "pvc-a".to_string());
        let g1 = gate.acquire(key.clone()).await;
        assert_eq!(gate.in_flight(), 1);
        let gate2 = gate.clone();
        let key2 = key.clone();
        let handle = tokio::spawn(async move {
            let _g = gate2.acquire(key2).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "same key must not admit concurrently");
        drop(g1);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter unblocks once the key is released")
            .unwrap();
    }
}
