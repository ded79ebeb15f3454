//! Cache of emoji favicons, keyed by host.

use std::collections::HashMap;
use std::sync::RwLock;

/// Sentinel value meaning a host is confirmed to have no valid favicon, as
/// opposed to not having been checked yet.
pub const KNOWN_NO_FAVICON: &str = "no";

/// Thread-safe, unbounded map from host to emoji favicon.
#[derive(Default)]
pub struct FaviconCache {
    favicons: RwLock<HashMap<String, String>>,
}

impl FaviconCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        FaviconCache::default()
    }

    /// Stores an emoji for a host. It does not verify that the string
    /// passed is actually an emoji. Pass [`KNOWN_NO_FAVICON`] when a host
    /// is known not to have a valid favicon.
    pub fn insert(&self, host: &str, emoji: &str) {
        self.favicons
            .write()
            .unwrap()
            .insert(host.to_string(), emoji.to_string());
    }

    /// Returns the favicon string for a host. `None` means the host hasn't
    /// been checked yet; [`KNOWN_NO_FAVICON`] means it has no favicon at
    /// all.
    pub fn get(&self, host: &str) -> Option<String> {
        self.favicons.read().unwrap().get(host).cloned()
    }

    /// Removes the cached favicon for a host.
    pub fn remove(&self, host: &str) {
        self.favicons.write().unwrap().remove(host);
    }

    /// Removes all favicons from the cache.
    pub fn clear(&self) {
        let mut favicons = self.favicons.write().unwrap();
        *favicons = HashMap::new();
    }

    /// Number of cached entries, counting known-absent ones.
    pub fn len(&self) -> usize {
        self.favicons.read().unwrap().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_vs_known_no_favicon() {
        let cache = FaviconCache::new();
        assert_eq!(cache.get("example.com"), None);

        cache.insert("example.com", KNOWN_NO_FAVICON);
        assert_eq!(cache.get("example.com").as_deref(), Some(KNOWN_NO_FAVICON));
    }

    #[test]
    fn test_insert_get_remove() {
        let cache = FaviconCache::new();
        cache.insert("example.com", "🚀");
        assert_eq!(cache.get("example.com").as_deref(), Some("🚀"));
        cache.remove("example.com");
        assert_eq!(cache.get("example.com"), None);
    }

    #[test]
    fn test_clear() {
        let cache = FaviconCache::new();
        cache.insert("one.example", "🌍");
        cache.insert("two.example", KNOWN_NO_FAVICON);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
