use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of per-key mutexes, lazily created on first use (spec.md §5:
/// "reconciles for the same cluster never interleave their client-cache
/// mutation"). Keys are cluster names; entries are never removed, which is
/// fine since the key space is bounded by the number of `RemoteCluster`
/// objects in the cluster.
#[derive(Clone, Default)]
pub struct MutexMap<K> {
    inner: Arc<Mutex<HashMap<K, Arc<Mutex<()>>>>>,
}

impl<K> MutexMap<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquires the lock for `key`, creating it if this is the first
    /// caller to ever touch `key`. Holding the returned guard serializes
    /// every other caller keyed on the same value.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let map: MutexMap<String> = MutexMap::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let map = map.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = map.lock("cluster-a".to_string()).await;
                order.lock().await.push('a');
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = {
            let map = map.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = map.lock("cluster-a".to_string()).await;
                order.lock().await.push('b');
            })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(*order.lock().await, vec!['a', 'b']);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let map: MutexMap<String> = MutexMap::new();
        let g1 = map.lock("cluster-a".to_string()).await;
        let fut = map.lock("cluster-b".to_string());
        let g2 = tokio::time::timeout(std::time::Duration::from_millis(50), fut)
            .await
            .expect("distinct keys must not contend");
        drop(g1);
        drop(g2);
    }
}
