//! Bounded cache of rendered pages.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use url::Url;

use crate::models::Page;

#[derive(Default)]
struct Inner {
    pages: HashMap<String, Arc<Page>>,
    // Duplicate of the keys in `pages`, in order of being added
    order: Vec<String>,
}

impl Inner {
    fn remove_key(&mut self, url: &str) {
        if let Some(i) = self.order.iter().position(|u| u == url) {
            self.order.remove(i);
        }
    }

    fn remove(&mut self, url: &str) {
        self.pages.remove(url);
        self.remove_key(url);
    }

    fn size(&self) -> usize {
        self.pages.values().map(|p| p.size()).sum()
    }
}

/// Thread-safe cache of rendered pages with page-count and byte-size
/// ceilings, evicted in strict insertion order (oldest first).
///
/// A ceiling of 0 means unlimited.
pub struct PageCache {
    inner: RwLock<Inner>,
    max_pages: usize,
    max_size: usize,
}

impl PageCache {
    /// Creates a cache holding at most `max_pages` pages and `max_size`
    /// total bytes. Either limit may be 0 for unlimited.
    pub fn new(max_pages: usize, max_size: usize) -> Self {
        PageCache {
            inner: RwLock::new(Inner::default()),
            max_pages,
            max_size,
        }
    }

    /// Adds a page to the cache, removing earlier pages as needed to keep
    /// the cache inside its limits.
    ///
    /// Pages with an empty URL, with a query string (dynamic or
    /// personalized content), or larger than the size ceiling are silently
    /// not added.
    pub fn insert(&self, page: Arc<Page>) {
        if page.url.is_empty() {
            return;
        }
        // Never cache pages with query strings, to reduce unexpected
        // behaviour
        if let Ok(parsed) = Url::parse(&page.url) {
            if parsed.query().is_some() {
                return;
            }
        }
        if self.max_size > 0 && page.size() > self.max_size {
            // This page can never be added
            return;
        }

        let mut inner = self.inner.write().unwrap();

        // Remove earlier pages to make room for this one. There should only
        // ever be one page to remove at most, but this handles more just in
        // case.
        while self.max_pages > 0 && inner.pages.len() >= self.max_pages {
            let oldest = inner.order[0].clone();
            inner.remove(&oldest);
        }
        // Do the same but for cache size
        while self.max_size > 0 && inner.size() + page.size() > self.max_size {
            let oldest = inner.order[0].clone();
            inner.remove(&oldest);
        }

        let url = page.url.clone();
        inner.pages.insert(url.clone(), page);
        // Remove the URL if it was already there, then add it to the end
        inner.remove_key(&url);
        inner.order.push(url);
    }

    /// Returns the cached page for a URL, if present.
    pub fn get(&self, url: &str) -> Option<Arc<Page>> {
        self.inner.read().unwrap().pages.get(url).cloned()
    }

    /// Removes a page from the cache. Removing an absent page is not an
    /// error.
    pub fn remove(&self, url: &str) {
        self.inner.write().unwrap().remove(url);
    }

    /// Removes all pages from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.pages = HashMap::new();
        inner.order = Vec::new();
    }

    /// Returns the approximate current size of the cache in bytes.
    pub fn size(&self) -> usize {
        self.inner.read().unwrap().size()
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().pages.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaType, RenderedDocument};

    fn page(url: &str, content: &str) -> Arc<Page> {
        Arc::new(Page::new(
            url,
            MediaType::Gemtext,
            "text/gemini",
            "",
            RenderedDocument {
                content: content.to_string(),
                styles: Vec::new(),
                links: Vec::new(),
            },
        ))
    }

    #[test]
    fn test_count_ceiling_keeps_newest() {
        let cache = PageCache::new(1, 0);
        cache.insert(page("gemini://one/", "first"));
        cache.insert(page("gemini://two/", "second"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("gemini://one/").is_none());
        assert!(cache.get("gemini://two/").is_some());
    }

    #[test]
    fn test_size_ceiling_evicts_oldest() {
        let first = page("gemini://one/", "aaaa");
        let ceiling = first.size();
        let cache = PageCache::new(0, ceiling);
        cache.insert(first);
        assert_eq!(cache.len(), 1);

        cache.insert(page("gemini://two/", "bb"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("gemini://one/").is_none());
        assert!(cache.get("gemini://two/").is_some());
    }

    #[test]
    fn test_never_caches_query_strings() {
        let cache = PageCache::new(0, 0);
        cache.insert(page("gemini://one/?input=abc", "dynamic"));
        assert_eq!(cache.len(), 0);
        assert!(cache.get("gemini://one/?input=abc").is_none());
    }

    #[test]
    fn test_oversized_page_never_added() {
        let big = page("gemini://one/", "a long page body");
        let cache = PageCache::new(0, big.size() - 1);
        cache.insert(big);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_reinsert_moves_to_end_of_eviction_order() {
        let cache = PageCache::new(2, 0);
        cache.insert(page("gemini://one/", "1"));
        cache.insert(page("gemini://two/", "2"));
        // Re-insert "one" so "two" becomes the oldest
        cache.insert(page("gemini://one/", "1 again"));
        cache.insert(page("gemini://three/", "3"));
        assert!(cache.get("gemini://two/").is_none());
        assert!(cache.get("gemini://one/").is_some());
        assert!(cache.get("gemini://three/").is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = PageCache::new(0, 0);
        cache.insert(page("gemini://one/", "1"));
        cache.insert(page("gemini://two/", "2"));
        cache.remove("gemini://one/");
        assert_eq!(cache.len(), 1);
        // Removing an absent page is fine
        cache.remove("gemini://one/");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }
}
