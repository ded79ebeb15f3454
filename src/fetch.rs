//! The fetch orchestrator: composes normalization, caches, the client, and
//! the renderer into one load operation.
//!
//! This is the only component with side effects beyond its own store.
//! Everything else is called synchronously from it, except page cache
//! writes, which happen concurrently with handing the page back.

use std::sync::Arc;

use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

use crate::cache::{FaviconCache, PageCache, RedirectCache, KNOWN_NO_FAVICON};
use crate::client::{FetchOutcome, GeminiClient, Response, StatusClass};
use crate::config::{Config, FAVICON_MAX_SIZE, GEMINI_DEFAULT_PORT, MAX_REDIRECTS};
use crate::error::{ErrorStats, ErrorType, FetchError};
use crate::models::Page;
use crate::render::{can_display, decode_meta, make_page};
use crate::tofu::TrustStore;
use crate::url_norm::normalize_url;

/// Why a response is being handed to the download flow instead of being
/// displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadReason {
    /// The body exceeded the configured maximum page size.
    TooLarge,
    /// The read deadline expired while downloading the body.
    TimedOut,
    /// The response is fine but not a displayable text document.
    NotDisplayable,
}

/// What loading an address produced. The caller decides on all user-facing
/// messaging and follow-up actions.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A rendered page, fresh or from the cache.
    Page(Arc<Page>),
    /// The server's certificate conflicts with the pinned one. The caller
    /// may offer an override: reset the trust record, then consume
    /// `response` as usual.
    TrustMismatch {
        /// The response, usable after an override.
        response: Response,
        /// Host the trust check ran against.
        host: String,
        /// Port the trust check ran against.
        port: u16,
        /// Expiry of the conflicting stored record.
        expiry: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// The server requests user input (status 1x).
    Input {
        /// Prompt to show the user.
        prompt: String,
        /// Whether the input is sensitive (status 11).
        sensitive: bool,
    },
    /// A redirect that is not followed automatically: the target is
    /// non-gemini, auto-redirect is off, or the hop limit was reached.
    RedirectPrompt {
        /// Normalized redirect target.
        target: String,
        /// Whether the redirect was permanent (status 31).
        permanent: bool,
    },
    /// A response that should be offered as a download; its stream has
    /// been restarted so consumption starts from the first byte.
    Download {
        /// The response with its replayable body.
        response: Response,
        /// Why it wasn't displayed.
        reason: DownloadReason,
    },
    /// A failure status from the server (4x, 5x, or 6x).
    Failed {
        /// The two-digit status code.
        status: u8,
        /// Server-supplied error text.
        meta: String,
    },
    /// A non-gemini address with no proxy configured; the caller owns
    /// opening it externally.
    External {
        /// The address, normalized as far as possible.
        url: String,
    },
}

/// Splits a proxy setting in `host` or `host:port` form, defaulting the
/// port. Bracketed IPv6 literals are understood; a bare IPv6 address is
/// taken as host-only.
fn split_proxy(proxy: &str) -> (String, u16) {
    if let Some(rest) = proxy.strip_prefix('[') {
        if let Some((host, after)) = rest.split_once(']') {
            let port = after
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(GEMINI_DEFAULT_PORT);
            return (host.to_string(), port);
        }
    }
    match proxy.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (proxy.to_string(), GEMINI_DEFAULT_PORT),
        },
        _ => (proxy.to_string(), GEMINI_DEFAULT_PORT),
    }
}

/// Context grouping the shared services a load operation needs.
///
/// The caches and trust store are owned service objects injected here
/// rather than ambient globals, so the orchestrator can be exercised with
/// empty or pre-seeded caches in tests.
pub struct FetchContext {
    client: GeminiClient,
    /// Immutable configuration, constructed once per process.
    pub config: Arc<Config>,
    /// Cache of rendered pages.
    pub pages: Arc<PageCache>,
    /// Cache of collapsed permanent redirects.
    pub redirects: Arc<RedirectCache>,
    /// Cache of emoji favicons.
    pub favicons: Arc<FaviconCache>,
    /// Error counters, incremented on every failed load.
    pub error_stats: Arc<ErrorStats>,
}

impl FetchContext {
    /// Creates a context with caches sized from the configuration.
    pub fn new(config: Arc<Config>, trust: Arc<TrustStore>) -> Self {
        let pages = Arc::new(PageCache::new(
            config.cache_max_pages,
            config.cache_max_size,
        ));
        Self::from_parts(
            config,
            trust,
            pages,
            Arc::new(RedirectCache::new()),
            Arc::new(FaviconCache::new()),
            Arc::new(ErrorStats::new()),
        )
    }

    /// Creates a context from externally owned services.
    pub fn from_parts(
        config: Arc<Config>,
        trust: Arc<TrustStore>,
        pages: Arc<PageCache>,
        redirects: Arc<RedirectCache>,
        favicons: Arc<FaviconCache>,
        error_stats: Arc<ErrorStats>,
    ) -> Self {
        FetchContext {
            client: GeminiClient::new(trust),
            config,
            pages,
            redirects,
            favicons,
            error_stats,
        }
    }

    /// The trust store used for certificate verification, for override
    /// flows.
    pub fn trust_store(&self) -> &Arc<TrustStore> {
        self.client.trust_store()
    }

    fn record_error(&self, err: &FetchError) {
        self.error_stats.increment(ErrorType::from(err));
    }

    /// Loads an address: normalizes it, consults the redirect and page
    /// caches, fetches, verifies trust, and classifies or renders the
    /// response.
    ///
    /// Returns the final URL (after redirects) together with the outcome.
    /// Server redirects are followed automatically only while the target
    /// stays on the gemini scheme, auto-redirect is configured, and fewer
    /// than the hop limit have been taken; anything else surfaces as
    /// [`LoadOutcome::RedirectPrompt`].
    pub async fn load(&self, addr: &str) -> Result<(String, LoadOutcome), FetchError> {
        let mut url = normalize_url(addr);
        let mut redirects_followed = 0usize;

        loop {
            url = self.redirects.resolve(&url);

            let parsed = match Url::parse(&url) {
                Ok(parsed) => parsed,
                Err(_) => {
                    let err = FetchError::MalformedAddress(url);
                    self.record_error(&err);
                    return Err(err);
                }
            };

            let proxy = match parsed.scheme() {
                "gemini" => None,
                scheme => match self.config.proxy_for_scheme(scheme) {
                    Some(proxy) => Some(split_proxy(proxy)),
                    // No proxy available: the caller owns this address
                    None => return Ok((url.clone(), LoadOutcome::External { url })),
                },
            };
            let proxied = proxy.is_some();

            // Load the page from the cache if it exists, unless this is a
            // page the server redirected to (indicates dynamic content)
            if redirects_followed == 0 {
                if let Some(page) = self.pages.get(&url) {
                    debug!("cache hit for {url}");
                    return Ok((url, LoadOutcome::Page(page)));
                }
            }

            let outcome = match &proxy {
                Some((host, port)) => self.client.fetch_via_proxy(host, *port, &url).await,
                None => self.client.fetch(&url).await,
            };
            let mut res = match outcome {
                Ok(FetchOutcome::Success(res)) => res,
                Ok(FetchOutcome::TrustMismatch {
                    response,
                    host,
                    port,
                    expiry,
                }) => {
                    self.error_stats.increment(ErrorType::TrustViolation);
                    return Ok((
                        url,
                        LoadOutcome::TrustMismatch {
                            response,
                            host,
                            port,
                            expiry,
                        },
                    ));
                }
                Err(err) => {
                    self.record_error(&err);
                    return Err(err);
                }
            };

            if can_display(&res) {
                match make_page(&url, &mut res, self.config.wrap_width, proxied, &self.config)
                    .await
                {
                    Ok(page) => {
                        let page = Arc::new(page);
                        // The cache write happens concurrently with
                        // handing the page back
                        let pages = Arc::clone(&self.pages);
                        let cached = Arc::clone(&page);
                        tokio::spawn(async move { pages.insert(cached) });
                        return Ok((url, LoadOutcome::Page(page)));
                    }
                    Err(err @ (FetchError::TooLarge | FetchError::TimedOut)) => {
                        // Recoverable: go back to the start of the stream
                        // and let the caller download it instead
                        self.record_error(&err);
                        res.body.restart();
                        let reason = match err {
                            FetchError::TooLarge => DownloadReason::TooLarge,
                            _ => DownloadReason::TimedOut,
                        };
                        return Ok((url, LoadOutcome::Download { response: res, reason }));
                    }
                    Err(err) => {
                        self.record_error(&err);
                        return Err(err);
                    }
                }
            }

            // Not displayable: a non-20 status, or a different kind of
            // document
            match res.status_class() {
                StatusClass::Input => {
                    return Ok((
                        url,
                        LoadOutcome::Input {
                            sensitive: res.is_sensitive_input(),
                            prompt: res.meta,
                        },
                    ));
                }
                StatusClass::Redirect => {
                    let target = match parsed.join(&res.meta) {
                        Ok(target) => normalize_url(target.as_str()),
                        Err(_) => {
                            let err = FetchError::MalformedAddress(res.meta);
                            self.record_error(&err);
                            return Err(err);
                        }
                    };
                    let permanent = res.is_permanent_redirect();
                    let native = target.starts_with("gemini://");
                    if !native
                        || !self.config.auto_redirect
                        || redirects_followed >= MAX_REDIRECTS
                    {
                        return Ok((url, LoadOutcome::RedirectPrompt { target, permanent }));
                    }
                    if permanent {
                        self.redirects.record(&url, &target);
                    }
                    debug!("following redirect {url} -> {target}");
                    redirects_followed += 1;
                    url = target;
                }
                StatusClass::TemporaryFailure
                | StatusClass::PermanentFailure
                | StatusClass::CertificateRequired => {
                    return Ok((
                        url,
                        LoadOutcome::Failed {
                            status: res.status,
                            meta: res.meta,
                        },
                    ));
                }
                StatusClass::Success | StatusClass::Unknown => {
                    // Status 20 with a body this client can't display;
                    // offer it as a download
                    res.body.restart();
                    return Ok((
                        url,
                        LoadOutcome::Download {
                            response: res,
                            reason: DownloadReason::NotDisplayable,
                        },
                    ));
                }
            }
        }
    }

    /// Spawns [`load`](FetchContext::load) on its own task, so the caller's
    /// control path stays responsive and joins only when it needs the
    /// result.
    pub fn spawn_load(
        self: &Arc<Self>,
        addr: &str,
    ) -> JoinHandle<Result<(String, LoadOutcome), FetchError>> {
        let ctx = Arc::clone(self);
        let addr = addr.to_string();
        tokio::spawn(async move { ctx.load(&addr).await })
    }

    /// Loads an address after evicting it from the page cache, for manual
    /// reloads that must bypass cached content.
    pub async fn reload(&self, addr: &str) -> Result<(String, LoadOutcome), FetchError> {
        let url = self.redirects.resolve(&normalize_url(addr));
        self.pages.remove(&url);
        self.load(addr).await
    }

    /// Returns the emoji favicon for a host, fetching `favicon.txt` and
    /// caching the result (or its known absence) as a side effect.
    ///
    /// Returns `None` when favicons are disabled, the host has none, or
    /// the fetch failed.
    pub async fn load_favicon(&self, host: &str) -> Option<String> {
        if !self.config.emoji_favicons || host.is_empty() {
            return None;
        }
        match self.favicons.get(host) {
            Some(cached) if cached == KNOWN_NO_FAVICON => return None,
            Some(cached) => return Some(cached),
            None => {}
        }

        let url = format!("gemini://{host}/favicon.txt");
        let mut res = match self.client.fetch(&url).await {
            Ok(FetchOutcome::Success(res)) => res,
            // Mismatching certs and fetch errors both mean no favicon now;
            // only record certain absence for well-formed answers
            Ok(FetchOutcome::TrustMismatch { .. }) | Err(_) => {
                self.favicons.insert(host, KNOWN_NO_FAVICON);
                return None;
            }
        };

        if res.status != 20 {
            self.favicons.insert(host, KNOWN_NO_FAVICON);
            return None;
        }
        let (mediatype, _) = decode_meta(&res.meta);
        if !mediatype.starts_with("text/") {
            // Not a textual page
            self.favicons.insert(host, KNOWN_NO_FAVICON);
            return None;
        }

        // +2 for a trailing CRLF, +1 so an oversized response is detectable
        let limit = (FAVICON_MAX_SIZE + 3) as u64;
        let mut buf = Vec::new();
        let read = async {
            (&mut res.body).take(limit).read_to_end(&mut buf).await
        };
        let result = match self.config.read_deadline() {
            Some(deadline) => match timeout(deadline, read).await {
                Ok(result) => result,
                Err(_) => return None,
            },
            None => read.await,
        };
        if let Err(err) = result {
            // Could be a temporary error, so absence is not known
            warn!("favicon read failed for {host}: {err}");
            return None;
        }
        if buf.len() as u64 >= limit {
            self.favicons.insert(host, KNOWN_NO_FAVICON);
            return None;
        }

        let Ok(text) = std::str::from_utf8(&buf) else {
            self.favicons.insert(host, KNOWN_NO_FAVICON);
            return None;
        };
        let emoji = text.trim_end_matches(['\r', '\n']);
        // A crude emoji check: short, non-empty, and nothing from the
        // ASCII range
        if emoji.is_empty() || emoji.chars().any(|c| c.is_ascii()) {
            self.favicons.insert(host, KNOWN_NO_FAVICON);
            return None;
        }

        self.favicons.insert(host, emoji);
        Some(emoji.to_string())
    }

    /// Fire-and-forget variant of [`load_favicon`](FetchContext::load_favicon).
    pub fn spawn_favicon(self: &Arc<Self>, host: &str) {
        let ctx = Arc::clone(self);
        let host = host.to_string();
        tokio::spawn(async move {
            ctx.load_favicon(&host).await;
        });
    }
}
