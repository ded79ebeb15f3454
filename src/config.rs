//! Configuration for the client core.
//!
//! All tunables are collected into one immutable [`Config`] value constructed
//! once per process and passed explicitly into the fetch orchestrator and the
//! renderer. Nothing in this crate reads configuration from ambient state.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;

// constants (used as defaults)

/// Default port for the Gemini protocol.
pub const GEMINI_DEFAULT_PORT: u16 = 1965;

/// Maximum length in bytes of a request URL, per the Gemini specification.
pub const URL_MAX_LENGTH: usize = 1024;

/// Maximum length in bytes of the META field of a response header.
pub const META_MAX_LENGTH: usize = 1024;

/// Maximum number of server redirects followed automatically before the
/// caller is asked to confirm.
pub const MAX_REDIRECTS: usize = 5;

/// Maximum size in bytes of a fetched favicon response. Anything larger is
/// treated as "no favicon".
pub const FAVICON_MAX_SIZE: usize = 32;

// Defaults for the fields below
const DEFAULT_PAGE_MAX_SIZE: usize = 2_097_152; // 2 MiB
const DEFAULT_PAGE_MAX_TIME_SECS: u64 = 10;
const DEFAULT_MAX_PAGES: usize = 30;
const DEFAULT_WRAP_WIDTH: usize = 100;
const DEFAULT_LEFT_MARGIN: f64 = 0.15;

/// Configuration consumed by the client core.
///
/// The struct doubles as the CLI argument surface for the thin binary; a
/// library embedder can construct it directly or start from
/// [`Config::default`].
#[derive(Parser, Debug, Clone)]
#[command(name = "gemclient", about = "Fetch and render a Gemini page")]
pub struct Config {
    /// Maximum size in bytes of a page that will be rendered. Larger
    /// responses are handed to the download flow. 0 means unlimited.
    #[arg(long, default_value_t = DEFAULT_PAGE_MAX_SIZE)]
    pub page_max_size: usize,

    /// Read deadline in seconds for downloading a page body. 0 disables the
    /// deadline. Applies to the read phase only, never to connecting.
    #[arg(long, default_value_t = DEFAULT_PAGE_MAX_TIME_SECS)]
    pub page_max_time: u64,

    /// Maximum number of pages the page cache will hold. 0 means unlimited.
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    pub cache_max_pages: usize,

    /// Maximum total size in bytes of the page cache. 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub cache_max_size: usize,

    /// Number of columns text is word-wrapped to. Preformatted blocks are
    /// never wrapped.
    #[arg(long, default_value_t = DEFAULT_WRAP_WIDTH)]
    pub wrap_width: usize,

    /// Fraction of the wrap width used as a blank left margin on every
    /// rendered line.
    #[arg(long, default_value_t = DEFAULT_LEFT_MARGIN)]
    pub left_margin: f64,

    /// Whether color information is meaningful to the consumer. Carried for
    /// the UI layer; rendering semantics do not depend on it.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub color: bool,

    /// Replace the asterisk of list items with a Unicode bullet.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub bullets: bool,

    /// Allow ANSI escape sequences in preformatted blocks instead of
    /// stripping them.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub ansi: bool,

    /// Follow server redirects automatically, up to the redirect limit.
    #[arg(long)]
    pub auto_redirect: bool,

    /// Fetch `favicon.txt` emoji favicons for visited hosts.
    #[arg(long)]
    pub emoji_favicons: bool,

    /// Per-scheme proxy table: maps a URL scheme (e.g. "http") to a Gemini
    /// proxy in `host` or `host:port` form. Schemes without an entry are
    /// handed back to the caller for external handling.
    #[arg(skip)]
    pub proxies: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_max_size: DEFAULT_PAGE_MAX_SIZE,
            page_max_time: DEFAULT_PAGE_MAX_TIME_SECS,
            cache_max_pages: DEFAULT_MAX_PAGES,
            cache_max_size: 0,
            wrap_width: DEFAULT_WRAP_WIDTH,
            left_margin: DEFAULT_LEFT_MARGIN,
            color: true,
            bullets: true,
            ansi: true,
            auto_redirect: false,
            emoji_favicons: false,
            proxies: HashMap::new(),
        }
    }
}

impl Config {
    /// Read deadline as a `Duration`, or `None` when disabled.
    pub fn read_deadline(&self) -> Option<Duration> {
        if self.page_max_time == 0 {
            None
        } else {
            Some(Duration::from_secs(self.page_max_time))
        }
    }

    /// Number of blank columns prepended to every rendered line, derived
    /// from the margin fraction and the wrap width.
    pub fn margin_columns(&self) -> usize {
        (self.left_margin.clamp(0.0, 1.0) * self.wrap_width as f64) as usize
    }

    /// Looks up the configured proxy for a scheme, ignoring entries that are
    /// empty or explicitly set to "off".
    pub fn proxy_for_scheme(&self, scheme: &str) -> Option<&str> {
        match self.proxies.get(scheme).map(String::as_str) {
            None | Some("") | Some("off") => None,
            Some(proxy) => Some(proxy.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_columns_uses_fraction_of_width() {
        let config = Config {
            wrap_width: 100,
            left_margin: 0.15,
            ..Config::default()
        };
        assert_eq!(config.margin_columns(), 15);
    }

    #[test]
    fn test_proxy_for_scheme_skips_off_entries() {
        let mut config = Config::default();
        config.proxies.insert("http".into(), "off".into());
        config.proxies.insert("foo".into(), "proxy.example.com:1965".into());
        assert_eq!(config.proxy_for_scheme("http"), None);
        assert_eq!(config.proxy_for_scheme("foo"), Some("proxy.example.com:1965"));
        assert_eq!(config.proxy_for_scheme("gopher"), None);
    }

    #[test]
    fn test_read_deadline_zero_disables() {
        let config = Config {
            page_max_time: 0,
            ..Config::default()
        };
        assert!(config.read_deadline().is_none());
    }
}
