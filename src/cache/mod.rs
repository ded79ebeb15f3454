//! In-memory caches for pages, redirects, and favicons.
//!
//! All three caches are fully thread safe: each one guards its state behind
//! a single read-write lock held only for the duration of the map mutation,
//! never across I/O. Nothing here persists; every cache resets on process
//! restart.
//!
//! The caches are owned service objects injected into the fetch
//! orchestrator, not ambient global state, so the orchestrator stays unit
//! testable with empty caches.

mod favicon;
mod page;
mod redirect;

pub use favicon::{FaviconCache, KNOWN_NO_FAVICON};
pub use page::PageCache;
pub use redirect::RedirectCache;
