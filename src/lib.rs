//! gemclient library: core Gemini client functionality
//!
//! This library provides the non-UI core of a Gemini browser: URL
//! normalization, a trust-on-first-use (TOFU) certificate store, redirect and
//! page caches, a gemtext renderer, and a fetch orchestrator that ties them
//! together. It produces data structures and pure functions; all user-facing
//! presentation is left to the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gemclient::{Config, FetchContext, LoadOutcome, TrustStore};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! gemclient::init_crypto_provider();
//!
//! let config = Arc::new(Config::default());
//! let trust = Arc::new(TrustStore::load("known_hosts.toml")?);
//! let ctx = Arc::new(FetchContext::new(config, trust));
//!
//! if let (url, LoadOutcome::Page(page)) = ctx.load("gemini.circumlunar.space").await? {
//!     print!("{}", page.content);
//!     println!("fetched {} with {} links", url, page.links.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

#![warn(missing_docs)]

mod cache;
mod client;
pub mod config;
mod error;
mod fetch;
mod models;
mod render;
mod stream;
mod tofu;
mod url_norm;

// Re-export public API
pub use cache::{FaviconCache, PageCache, RedirectCache, KNOWN_NO_FAVICON};
pub use client::{
    init_crypto_provider, status_description, FetchOutcome, GeminiClient, Response, StatusClass,
};
pub use config::Config;
pub use error::{ErrorStats, ErrorType, FetchError};
pub use fetch::{DownloadReason, FetchContext, LoadOutcome};
pub use models::{LineStyle, MediaType, Page, RenderedDocument, ScrollPos};
pub use render::{
    can_display, decode_meta, make_page, render_gemtext, render_plain_text, RenderConfig,
};
pub use stream::RestartableStream;
pub use tofu::{TrustRecord, TrustStore};
pub use url_norm::{fix_user_url, normalize_url};
