//! Client-side caches for registry reads.
//!
//! Two process-wide caches govern repeated-read latency: a TTL map for
//! search results and an LRU for per-skill metadata used by the resolver.
//! Both are safe to share across concurrent operations; locks are held only
//! around the map itself, never across a network call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::process::SkillVersion;

/// How long a cached search result stays fresh.
pub const SEARCH_TTL: Duration = Duration::from_secs(300);

/// Metadata cache capacity.
pub const METADATA_CAPACITY: usize = 100;

struct SearchSlot {
    results: Vec<SkillVersion>,
    cached_at: Instant,
}

/// Search-result cache keyed by normalized query, with lazy eviction:
/// expired entries are dropped when read, not by a background sweeper.
pub struct SearchCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, SearchSlot>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::with_ttl(SEARCH_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, query: &str) -> Option<Vec<SkillVersion>> {
        let mut slots = self.slots.lock().ok()?;
        match slots.get(query) {
            Some(slot) if slot.cached_at.elapsed() <= self.ttl => Some(slot.results.clone()),
            Some(_) => {
                slots.remove(query);
                tracing::debug!(%query, "search cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, query: &str, results: Vec<SkillVersion>) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(
                query.to_string(),
                SearchSlot {
                    results,
                    cached_at: Instant::now(),
                },
            );
        }
    }

    /// Drop all entries (for tests).
    pub fn clear(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.clear();
        }
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new()
    }
}

struct LruInner {
    entries: HashMap<String, SkillVersion>,
    order: VecDeque<String>,
}

/// LRU metadata cache keyed by `name` or `name@version`.
///
/// Persistent across resolve calls within a process; a hit moves the key to
/// the back, eviction pops the front once capacity is exceeded.
pub struct MetadataCache {
    capacity: usize,
    inner: Mutex<LruInner>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::with_capacity(METADATA_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<SkillVersion> {
        let mut inner = self.inner.lock().ok()?;
        let value = inner.entries.get(key).cloned()?;
        // Move-to-end on hit.
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        Some(value)
    }

    pub fn put(&self, key: &str, value: SkillVersion) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.entries.insert(key.to_string(), value).is_none() {
            inner.order.push_back(key.to_string());
        } else {
            inner.order.retain(|k| k != key);
            inner.order.push_back(key.to_string());
        }
        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "metadata cache evicted");
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries (for tests).
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.order.clear();
        }
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, skill_version: &str) -> SkillVersion {
        SkillVersion {
            name: name.to_string(),
            version: skill_version.to_string(),
            description: "test".to_string(),
            author: "tester".to_string(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            mcp_servers: Vec::new(),
            changelog: None,
            owner: "O".repeat(43),
            arweave_tx_id: "T".repeat(43),
            published_at: 0,
            updated_at: 0,
            download_count: 0,
            download_timestamps: Vec::new(),
        }
    }

    #[test]
    fn test_search_cache_hit() {
        let cache = SearchCache::new();
        cache.put("ao", vec![skill("ao-basics", "1.0.0")]);
        let hit = cache.get("ao").unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].name, "ao-basics");
    }

    #[test]
    fn test_search_cache_miss() {
        let cache = SearchCache::new();
        assert!(cache.get("nothing").is_none());
    }

    #[test]
    fn test_search_cache_expires_lazily() {
        let cache = SearchCache::with_ttl(Duration::ZERO);
        cache.put("ao", vec![skill("ao-basics", "1.0.0")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("ao").is_none());
        // The expired slot was evicted on read.
        assert!(cache.get("ao").is_none());
    }

    #[test]
    fn test_search_cache_clear() {
        let cache = SearchCache::new();
        cache.put("ao", vec![skill("ao-basics", "1.0.0")]);
        cache.clear();
        assert!(cache.get("ao").is_none());
    }

    #[test]
    fn test_metadata_cache_roundtrip() {
        let cache = MetadataCache::new();
        cache.put("ao-basics", skill("ao-basics", "1.0.0"));
        cache.put("ao-basics@0.9.0", skill("ao-basics", "0.9.0"));
        assert_eq!(cache.get("ao-basics").unwrap().version, "1.0.0");
        assert_eq!(cache.get("ao-basics@0.9.0").unwrap().version, "0.9.0");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_metadata_cache_evicts_least_recent() {
        let cache = MetadataCache::with_capacity(2);
        cache.put("a", skill("a", "1.0.0"));
        cache.put("b", skill("b", "1.0.0"));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a").unwrap();
        cache.put("c", skill("c", "1.0.0"));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_metadata_cache_put_same_key_replaces() {
        let cache = MetadataCache::with_capacity(2);
        cache.put("a", skill("a", "1.0.0"));
        cache.put("a", skill("a", "2.0.0"));
        assert_eq!(cache.get("a").unwrap().version, "2.0.0");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_metadata_cache_capacity_100_default() {
        let cache = MetadataCache::new();
        for i in 0..150 {
            cache.put(&format!("skill-{i}"), skill(&format!("skill-{i}"), "1.0.0"));
        }
        assert_eq!(cache.len(), METADATA_CAPACITY);
        // The oldest 50 were evicted.
        assert!(cache.get("skill-0").is_none());
        assert!(cache.get("skill-149").is_some());
    }

    #[test]
    fn test_metadata_cache_clear() {
        let cache = MetadataCache::new();
        cache.put("a", skill("a", "1.0.0"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
