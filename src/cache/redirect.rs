//! Cache of permanent redirects, pre-collapsed so resolution is one lookup.

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe map from original URLs to their current redirect targets.
///
/// Chains and loops are collapsed at insertion time, so
/// [`resolve`](RedirectCache::resolve) never needs more than one hop.
#[derive(Default)]
pub struct RedirectCache {
    redirects: RwLock<HashMap<String, String>>,
}

impl RedirectCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        RedirectCache::default()
    }

    /// Records an original-to-target redirect pair.
    ///
    /// Existing entries pointing at `original` are rewritten to point at
    /// `target` (chain collapse), and an existing entry keyed by `target`
    /// is deleted so the most recently recorded edge of a loop wins. The
    /// scan is O(n), acceptable because the table is small and redirects
    /// are rare.
    pub fn record(&self, original: &str, target: &str) {
        let mut redirects = self.redirects.write().unwrap();

        let mut to_delete = None;
        for (key, value) in redirects.iter_mut() {
            if value == original {
                // `original` is the redirect target for `key`, so there is
                // a chain: key -> original -> target. Collapse it.
                *value = target.to_string();
            }
            if key == target {
                // There's a loop; the newer version is preferred
                to_delete = Some(key.clone());
            }
        }
        if let Some(key) = to_delete {
            redirects.remove(&key);
        }

        redirects.insert(original.to_string(), target.to_string());
    }

    /// Returns the redirected version of a URL if one exists in the cache,
    /// or the URL itself otherwise.
    pub fn resolve(&self, url: &str) -> String {
        let redirects = self.redirects.read().unwrap();
        // A single lookup is enough, because record() removes loops and
        // chains.
        match redirects.get(url) {
            Some(target) => target.clone(),
            None => url.to_string(),
        }
    }

    /// Removes all redirects from the cache.
    pub fn clear(&self) {
        let mut redirects = self.redirects.write().unwrap();
        *redirects = HashMap::new();
    }

    /// Number of recorded redirects.
    pub fn len(&self) -> usize {
        self.redirects.read().unwrap().len()
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
    fn test_resolve_absent_is_identity() {
        let cache = RedirectCache::new();
        assert_eq!(cache.resolve("gemini://a/"), "gemini://a/");
    }

    #[test]
    fn test_chain_collapses_to_single_hop() {
        let cache = RedirectCache::new();
        cache.record("gemini://a/", "gemini://b/");
        cache.record("gemini://b/", "gemini://c/");
        assert_eq!(cache.resolve("gemini://a/"), "gemini://c/");
        assert_eq!(cache.resolve("gemini://b/"), "gemini://c/");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_loop_keeps_most_recent_edge() {
        let cache = RedirectCache::new();
        cache.record("gemini://a/", "gemini://b/");
        cache.record("gemini://b/", "gemini://a/");
        // The newer edge b -> a wins and the stale a -> b entry is gone
        assert_eq!(cache.resolve("gemini://b/"), "gemini://a/");
        assert_eq!(cache.resolve("gemini://a/"), "gemini://a/");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rerecord_overwrites() {
        let cache = RedirectCache::new();
        cache.record("gemini://a/", "gemini://b/");
        cache.record("gemini://a/", "gemini://c/");
        assert_eq!(cache.resolve("gemini://a/"), "gemini://c/");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = RedirectCache::new();
        cache.record("gemini://a/", "gemini://b/");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.resolve("gemini://a/"), "gemini://a/");
    }
}
