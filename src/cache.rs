//! Run-scoped URL caches shared by concurrent fetch workers.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Concurrent map from an input URL to its resolved value.
///
/// `None` records a lookup that was attempted and failed, so it is not
/// retried within the same run. Concurrent inserts for one key are
/// last-writer-wins.
#[derive(Debug, Default)]
pub struct UrlCache {
    entries: DashMap<String, Option<String>>,
    hits: AtomicUsize,
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(..)` when the key has been looked up before in this run.
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        let found = self.entries.get(key).map(|v| v.value().clone());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn insert(&self, key: &str, value: Option<String>) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

/// The two caches a run needs: redirect resolution and page images.
#[derive(Debug, Default)]
pub struct RunCaches {
    pub redirects: UrlCache,
    pub images: UrlCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_records_failures() {
        let cache = UrlCache::new();
        assert_eq!(cache.get("a"), None);
        cache.insert("a", Some("b".into()));
        cache.insert("c", None);
        assert_eq!(cache.get("a"), Some(Some("b".into())));
        assert_eq!(cache.get("c"), Some(None));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 2);
    }
}
