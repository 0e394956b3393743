use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Per-run memo cache for shared reference entities (products, categories,
/// brands, EAN resolutions).
///
/// Concurrency contract: the key lookup and the store each take the lock, the
/// fetch itself runs outside it. Two tasks racing on the same cold key may
/// therefore both fetch. The lookups behind this cache are idempotent GETs,
/// so the duplicate work is bounded by phase concurrency and never produces a
/// wrong answer. Route a non-idempotent lookup through here and this must
/// become single-flight first.
///
/// Entries are `Option<V>`: `Some(None)` records a fetch that found nothing,
/// which is distinct from a key that was never attempted.
pub struct MemoCache<K, V> {
    entries: Mutex<HashMap<K, Option<V>>>,
}

impl<K, V> Default for MemoCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, fetching and storing it when the
    /// key was never attempted. A fetch that yields `None` is remembered as
    /// absent and not retried within the run.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        {
            let entries = self.entries.lock().expect("memo cache poisoned");
            if let Some(entry) = entries.get(&key) {
                return entry.clone();
            }
        }
        let fetched = fetch().await;
        let mut entries = self.entries.lock().expect("memo cache poisoned");
        entries.insert(key, fetched.clone());
        fetched
    }

    /// Read side for the assembler: outer `None` = never attempted, inner
    /// `None` = fetched but absent.
    pub fn get(&self, key: &K) -> Option<Option<V>> {
        let entries = self.entries.lock().expect("memo cache poisoned");
        entries.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        let entries = self.entries.lock().expect("memo cache poisoned");
        entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("memo cache poisoned");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn duplicate_keys_fetch_once() {
        let cache: MemoCache<String, u32> = MemoCache::new();
        let fetches = AtomicUsize::new(0);

        for round in 0..100u32 {
            let key = format!("k{}", round % 3);
            let value = cache
                .get_or_fetch(key, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Some(round)
                })
                .await;
            assert!(value.is_some());
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
        // First store wins; later rounds observe the round-0..2 values.
        assert_eq!(cache.get(&"k0".to_string()), Some(Some(0)));
        assert_eq!(cache.get(&"k1".to_string()), Some(Some(1)));
        assert_eq!(cache.get(&"k2".to_string()), Some(Some(2)));
    }

    #[tokio::test]
    async fn absent_is_remembered_and_distinct_from_untried() {
        let cache: MemoCache<&'static str, u32> = MemoCache::new();
        let fetches = AtomicUsize::new(0);

        let first = cache
            .get_or_fetch("ghost", || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        assert!(first.is_none());

        // Remembered as absent: no second fetch.
        let second = cache
            .get_or_fetch("ghost", || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Some(7)
            })
            .await;
        assert!(second.is_none());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        assert_eq!(cache.get(&"ghost"), Some(None));
        assert_eq!(cache.get(&"never"), None);
    }

    #[tokio::test]
    async fn concurrent_readers_share_the_stored_value() {
        let cache = std::sync::Arc::new(MemoCache::<u64, String>::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(42, || async { Some("dato".to_string()) })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.expect("join"), Some("dato".to_string()));
        }
        assert_eq!(cache.len(), 1);
    }
}
