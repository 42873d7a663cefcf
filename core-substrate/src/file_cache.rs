//! Content-addressed cache of file reads, shared across an agent hierarchy.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Identifies a cached file read by path and the mtime it was read at.
///
/// Two reads of the same path at different mtimes are different entries;
/// this is what lets the cache serve a stale read without re-touching disk
/// while still invalidating on an external write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// File path as passed to the read tool.
    pub path: String,
    /// Modification time, as a source-defined opaque counter (commonly a
    /// Unix timestamp in nanoseconds).
    pub mtime: u64,
}

impl CacheKey {
    /// Build a key from a path and mtime.
    pub fn new(path: impl Into<String>, mtime: u64) -> Self {
        Self {
            path: path.into(),
            mtime,
        }
    }
}

struct Entry {
    bytes: Vec<u8>,
    hash: u64,
    inserted_at: Instant,
}

/// A byte- and TTL-capped cache of file contents, consulted before any
/// file-read tool touches disk.
pub struct FileCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    max_total_bytes: u64,
    ttl: Duration,
}

impl FileCache {
    /// Create a cache capped at `max_total_bytes` total resident bytes,
    /// evicting entries older than `ttl` lazily on access.
    pub fn new(max_total_bytes: u64, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_total_bytes,
            ttl,
        }
    }

    /// Fetch cached bytes for `key`, if present and not expired. An expired
    /// entry is reaped on lookup and treated as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let now = Instant::now();
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                    return Some(entry.bytes.clone());
                }
                Some(_) => true,
                None => return None,
            }
        };
        if expired {
            self.entries.write().await.remove(key);
        }
        None
    }

    /// Insert `bytes` for `key`, hashed for content-addressing. Evicts the
    /// oldest entries first if the cache would exceed `max_total_bytes`.
    pub async fn put(&self, key: CacheKey, bytes: Vec<u8>) {
        if bytes.len() as u64 > self.max_total_bytes {
            return;
        }
        let hash = content_hash(&bytes);
        let mut entries = self.entries.write().await;
        self.evict_expired_locked(&mut entries);
        self.make_room_locked(&mut entries, bytes.len() as u64);
        entries.insert(
            key,
            Entry {
                bytes,
                hash,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Content hash of the cached entry for `key`, if present, without
    /// touching its TTL bookkeeping.
    pub async fn hash_of(&self, key: &CacheKey) -> Option<u64> {
        self.entries.read().await.get(key).map(|e| e.hash)
    }

    /// Invalidate every cached read for `path`, regardless of mtime. Used
    /// when a write tool touches a path that may be cached under a stale
    /// key.
    pub async fn invalidate_path(&self, path: &str) {
        self.entries.write().await.retain(|k, _| k.path != path);
    }

    fn evict_expired_locked(&self, entries: &mut HashMap<CacheKey, Entry>) {
        let now = Instant::now();
        entries.retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
    }

    fn make_room_locked(&self, entries: &mut HashMap<CacheKey, Entry>, incoming: u64) {
        let mut total: u64 = entries.values().map(|e| e.bytes.len() as u64).sum();
        if total + incoming <= self.max_total_bytes {
            return;
        }
        let mut by_age: Vec<CacheKey> = entries.iter().map(|(k, _)| k.clone()).collect();
        by_age.sort_by_key(|k| entries[k].inserted_at);
        for key in by_age {
            if total + incoming <= self.max_total_bytes {
                break;
            }
            if let Some(evicted) = entries.remove(&key) {
                total -= evicted.bytes.len() as u64;
            }
        }
    }

    /// Total bytes currently resident.
    pub async fn resident_bytes(&self) -> u64 {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.bytes.len() as u64)
            .sum()
    }
}

fn content_hash(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = FileCache::new(1024, Duration::from_secs(60));
        let key = CacheKey::new("src/lib.rs", 1);
        cache.put(key.clone(), b"hello".to_vec()).await;
        assert_eq!(cache.get(&key).await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn different_mtime_is_a_different_entry() {
        let cache = FileCache::new(1024, Duration::from_secs(60));
        cache.put(CacheKey::new("a.rs", 1), b"v1".to_vec()).await;
        cache.put(CacheKey::new("a.rs", 2), b"v2".to_vec()).await;
        assert_eq!(cache.get(&CacheKey::new("a.rs", 1)).await, Some(b"v1".to_vec()));
        assert_eq!(cache.get(&CacheKey::new("a.rs", 2)).await, Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = FileCache::new(1024, Duration::from_millis(1));
        let key = CacheKey::new("a.rs", 1);
        cache.put(key.clone(), b"hello".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn oversized_entry_is_not_cached() {
        let cache = FileCache::new(4, Duration::from_secs(60));
        let key = CacheKey::new("a.rs", 1);
        cache.put(key.clone(), b"too long".to_vec()).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn eviction_makes_room_for_new_entries_oldest_first() {
        let cache = FileCache::new(10, Duration::from_secs(60));
        cache.put(CacheKey::new("a.rs", 1), b"aaaaa".to_vec()).await;
        cache.put(CacheKey::new("b.rs", 1), b"bbbbb".to_vec()).await;
        // Cache is now full (10 bytes); inserting forces eviction of "a.rs".
        cache.put(CacheKey::new("c.rs", 1), b"ccccc".to_vec()).await;

        assert_eq!(cache.get(&CacheKey::new("a.rs", 1)).await, None);
        assert_eq!(
            cache.get(&CacheKey::new("b.rs", 1)).await,
            Some(b"bbbbb".to_vec())
        );
        assert_eq!(
            cache.get(&CacheKey::new("c.rs", 1)).await,
            Some(b"ccccc".to_vec())
        );
    }

    #[tokio::test]
    async fn invalidate_path_drops_all_mtimes_for_that_path() {
        let cache = FileCache::new(1024, Duration::from_secs(60));
        cache.put(CacheKey::new("a.rs", 1), b"v1".to_vec()).await;
        cache.put(CacheKey::new("a.rs", 2), b"v2".to_vec()).await;
        cache.invalidate_path("a.rs").await;
        assert_eq!(cache.get(&CacheKey::new("a.rs", 1)).await, None);
        assert_eq!(cache.get(&CacheKey::new("a.rs", 2)).await, None);
    }
}
