use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use chrono::{NaiveDate, Utc};

// ============================================================================
// TTL Cache
// ============================================================================
//
// Owned by the component that invalidates it. Entries expire on read; there is
// no background eviction.
//
// ============================================================================

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries.lock().await.insert(key, (Instant::now(), value));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.lock().await.remove(key);
    }
}

/// Per-key call budget that resets at UTC midnight.
pub struct DailyQuota {
    limit: u32,
    counters: Mutex<HashMap<String, (NaiveDate, u32)>>,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one unit for `key`; false when today's budget is spent.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let today = Utc::now().date_naive();
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key.to_string()).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        if entry.1 >= self.limit {
            return false;
        }
        entry.1 += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("providers", vec![1, 2]).await;
        assert_eq!(cache.get(&"providers").await, Some(vec![1, 2]));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(&"providers").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), 1).await;
        cache.insert("b".to_string(), 2).await;
        cache.invalidate(&"a".to_string()).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
        assert_eq!(cache.get(&"b".to_string()).await, Some(2));
    }

    #[tokio::test]
    async fn test_daily_quota_caps_per_key() {
        let quota = DailyQuota::new(2);
        assert!(quota.try_acquire("8982000000000000001").await);
        assert!(quota.try_acquire("8982000000000000001").await);
        assert!(!quota.try_acquire("8982000000000000001").await);
        assert!(quota.try_acquire("8982000000000000002").await);
    }
}
