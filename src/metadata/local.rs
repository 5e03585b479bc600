use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::{MetadataTier, VideoMetadata};

/// In-process tier: bounded LRU with per-entry TTL. O(1) lookups, evicted by
/// both capacity and age.
pub struct LocalTier {
    entries: Mutex<LruCache<String, (VideoMetadata, Instant)>>,
    ttl: Duration,
}

impl LocalTier {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }
}

#[async_trait]
impl MetadataTier for LocalTier {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn lookup(&self, path: &str) -> Option<VideoMetadata> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(path) {
            Some((meta, inserted)) if inserted.elapsed() < self.ttl => Some(meta.clone()),
            Some(_) => {
                entries.pop(path);
                None
            }
            None => None,
        }
    }

    async fn store(&self, path: &str, meta: &VideoMetadata) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(path.to_string(), (meta.clone(), Instant::now()));
        }
    }
}
