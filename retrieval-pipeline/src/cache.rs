use std::{collections::HashMap, time::Duration};

use sha2::{Digest, Sha256};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::QueryAnswer;

/// Bounded, TTL-guarded memo of full answers keyed by
/// `(tenant_id, normalized query, breadth)`.
///
/// Eviction is least-recently-ACCESSED: a `get` hit refreshes recency
/// even when the entry will later expire naturally. All read-modify-write
/// sequences run under one mutex, so concurrent requests cannot race a
/// recency update against an eviction.
pub struct ResultCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<HashMap<String, StoredEntry>>,
}

struct StoredEntry {
    answer: QueryAnswer,
    created_at: Instant,
    last_access: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl: Duration,
}

impl ResultCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Exact-string lookup; an expired entry is deleted and misses.
    pub async fn get(
        &self,
        tenant_id: &str,
        query_text: &str,
        breadth: usize,
    ) -> Option<QueryAnswer> {
        let key = cache_key(tenant_id, query_text, breadth);
        let now = Instant::now();

        let mut entries = self.inner.lock().await;
        match entries.get_mut(&key) {
            Some(entry) if now.duration_since(entry.created_at) > self.ttl => {
                entries.remove(&key);
                debug!("Cache entry expired");
                None
            }
            Some(entry) => {
                entry.last_access = now;
                info!("Cache hit");
                Some(entry.answer.clone())
            }
            None => {
                debug!("Cache miss");
                None
            }
        }
    }

    pub async fn set(
        &self,
        tenant_id: &str,
        query_text: &str,
        breadth: usize,
        answer: QueryAnswer,
    ) {
        let key = cache_key(tenant_id, query_text, breadth);
        let now = Instant::now();

        let mut entries = self.inner.lock().await;

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                debug!("Evicted least-recently-accessed cache entry");
            }
        }

        entries.insert(
            key,
            StoredEntry {
                answer,
                created_at: now,
                last_access: now,
            },
        );
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
        info!("Result cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.lock().await.len(),
            max_size: self.max_size,
            ttl: self.ttl,
        }
    }
}

/// Exact-string addressing: trim and lowercase, then hash. No semantic
/// or prefix matching.
fn cache_key(tenant_id: &str, query_text: &str, breadth: usize) -> String {
    let normalized = query_text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalized.as_bytes());
    hasher.update([0x1f]);
    hasher.update(breadth.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn answer(text: &str) -> QueryAnswer {
        QueryAnswer {
            answer: text.to_owned(),
            sources: Vec::new(),
            cached: false,
        }
    }

    #[tokio::test]
    async fn key_normalization_trims_and_lowercases() {
        let cache = ResultCache::new(10, Duration::from_secs(60));
        cache.set("tenant_a", "What About Fire?", 5, answer("a1")).await;

        let hit = cache.get("tenant_a", "  what about fire?  ", 5).await;
        assert!(hit.is_some(), "normalized key should match");

        let other_breadth = cache.get("tenant_a", "what about fire?", 6).await;
        assert!(other_breadth.is_none(), "breadth is part of the key");

        let other_tenant = cache.get("tenant_b", "what about fire?", 5).await;
        assert!(other_tenant.is_none(), "tenant is part of the key");
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let ttl = Duration::from_secs(60);
        let cache = ResultCache::new(10, ttl);
        cache.set("tenant_a", "query", 5, answer("a1")).await;

        advance(ttl - Duration::from_secs(1)).await;
        assert!(
            cache.get("tenant_a", "query", 5).await.is_some(),
            "entry just inside the TTL must hit"
        );

        advance(Duration::from_secs(2)).await;
        assert!(
            cache.get("tenant_a", "query", 5).await.is_none(),
            "entry past the TTL must miss"
        );

        assert_eq!(cache.stats().await.size, 0, "expired entry is deleted");
    }

    #[tokio::test(start_paused = true)]
    async fn access_refreshes_recency_for_eviction() {
        let cache = ResultCache::new(3, Duration::from_secs(3600));

        cache.set("tenant_a", "q1", 5, answer("a1")).await;
        advance(Duration::from_secs(1)).await;
        cache.set("tenant_a", "q2", 5, answer("a2")).await;
        advance(Duration::from_secs(1)).await;
        cache.set("tenant_a", "q3", 5, answer("a3")).await;
        advance(Duration::from_secs(1)).await;

        // Refresh q1 so q2 becomes the least-recently-accessed entry.
        assert!(cache.get("tenant_a", "q1", 5).await.is_some());
        advance(Duration::from_secs(1)).await;

        cache.set("tenant_a", "q4", 5, answer("a4")).await;

        assert!(cache.get("tenant_a", "q1", 5).await.is_some(), "q1 was refreshed");
        assert!(
            cache.get("tenant_a", "q2", 5).await.is_none(),
            "exactly the least-recently-accessed entry is evicted"
        );
        assert!(cache.get("tenant_a", "q3", 5).await.is_some());
        assert!(cache.get("tenant_a", "q4", 5).await.is_some());
    }

    #[tokio::test]
    async fn size_never_exceeds_max() {
        let cache = ResultCache::new(2, Duration::from_secs(3600));

        for i in 0..10 {
            cache.set("tenant_a", &format!("q{i}"), 5, answer("a")).await;
        }

        let stats = cache.stats().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 2);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = ResultCache::new(10, Duration::from_secs(3600));
        cache.set("tenant_a", "q1", 5, answer("a1")).await;

        cache.clear().await;

        assert_eq!(cache.stats().await.size, 0);
        assert!(cache.get("tenant_a", "q1", 5).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_respect_the_bound() {
        let cache = std::sync::Arc::new(ResultCache::new(4, Duration::from_secs(3600)));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = std::sync::Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..16 {
                    let query = format!("w{worker}-q{i}");
                    cache.set("tenant_a", &query, 5, answer("a")).await;
                    cache.get("tenant_a", &query, 5).await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("worker panicked");
        }

        assert!(cache.stats().await.size <= 4);
    }
}
