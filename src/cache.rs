use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Write-through hot cache for chat histories, keyed `chat:<id>`.
///
/// The metadata store stays authoritative: entries may expire or be evicted
/// at any time and readers fall back to the store on a miss, so eviction is
/// never observable.
pub struct HotCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

impl HotCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn chat_key(chat_id: &str) -> String {
        format!("chat:{chat_id}")
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let expired = {
            let entries = self.entries.read().await;
            let entry = entries.get(key)?;
            match self.ttl {
                Some(ttl) if entry.inserted_at.elapsed() > ttl => true,
                _ => return Some(entry.value.clone()),
            }
        };
        if expired {
            self.entries.write().await.remove(key);
        }
        None
    }

    pub async fn set(&self, key: &str, value: String) {
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_set_returns_value() {
        let cache = HotCache::new(None);
        let key = HotCache::chat_key("c1");
        assert!(cache.get(&key).await.is_none());
        cache.set(&key, "[]".to_string()).await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = HotCache::new(Some(Duration::from_millis(10)));
        cache.set("chat:c1", "[]".to_string()).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("chat:c1").await.is_none());
    }

    #[tokio::test]
    async fn set_replaces_previous_value() {
        let cache = HotCache::new(None);
        cache.set("chat:c1", "old".to_string()).await;
        cache.set("chat:c1", "new".to_string()).await;
        assert_eq!(cache.get("chat:c1").await.as_deref(), Some("new"));
    }
}
