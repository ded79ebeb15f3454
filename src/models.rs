//! Data structures shared between the renderer, the caches, and the fetch
//! orchestrator.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// Media type classification of a displayable page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// `text/gemini`: rendered through the gemtext path.
    Gemtext,
    /// Any other `text/*` type: rendered as plain text, no links.
    Plain,
}

/// Style of one rendered output line.
///
/// The rendered text carries visible `[N]` markers for links; this enum
/// carries everything else a UI needs to colorize a line without re-parsing
/// the markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    /// Regular wrapped text, including blank lines.
    Text,
    /// `#` heading.
    Heading1,
    /// `##` heading.
    Heading2,
    /// `###` heading.
    Heading3,
    /// A link line or a wrapped continuation of its label.
    Link {
        /// 1-based visible link number; the target is `links[number - 1]`.
        number: usize,
        /// Whether the target leaves the gemini scheme (always true when
        /// the page itself was fetched through a proxy).
        foreign: bool,
    },
    /// `* ` list item.
    Bullet,
    /// `>` quote line.
    Quote,
    /// Verbatim line inside a fenced preformatted block.
    Preformatted,
}

/// The output of one render call: wrapped display text plus everything
/// needed to map markers back to targets.
///
/// Immutable once produced, and cheap to re-derive from the raw text and a
/// width, so there is no incremental-update logic anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// Display text. Every line is terminated with `\r\n` and already
    /// carries the configured left margin.
    pub content: String,
    /// One entry per output line, aligned with the lines of `content`.
    pub styles: Vec<LineStyle>,
    /// Link targets in order of appearance; link number N maps to
    /// `links[N - 1]`.
    pub links: Vec<String>,
}

/// Scroll position of a page, remembered across cache round trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollPos {
    /// Vertical offset in lines.
    pub row: usize,
    /// Horizontal offset in columns.
    pub col: usize,
}

/// A fetched and rendered page.
///
/// Once inserted into the page cache the cache owns the page exclusively;
/// consumers hold `Arc<Page>` read-only views. The scroll position is the
/// one field a consumer may update, which is why it sits behind its own
/// lock.
#[derive(Debug)]
pub struct Page {
    /// Canonical URL the page was fetched from.
    pub url: String,
    /// Classification used to pick the render path.
    pub media_type: MediaType,
    /// The media type string as the server sent it.
    pub raw_media_type: String,
    /// Decoded response body, before rendering.
    pub raw: String,
    /// Rendered display text (see [`RenderedDocument::content`]).
    pub content: String,
    /// Per-output-line styles (see [`RenderedDocument::styles`]).
    pub styles: Vec<LineStyle>,
    /// Link targets; link number N maps to `links[N - 1]`.
    pub links: Vec<String>,
    /// When the page was rendered.
    pub made_at: DateTime<Utc>,
    scroll: RwLock<ScrollPos>,
}

impl Page {
    /// Builds a page from a rendered document.
    pub fn new(
        url: impl Into<String>,
        media_type: MediaType,
        raw_media_type: impl Into<String>,
        raw: impl Into<String>,
        doc: RenderedDocument,
    ) -> Self {
        Page {
            url: url.into(),
            media_type,
            raw_media_type: raw_media_type.into(),
            raw: raw.into(),
            content: doc.content,
            styles: doc.styles,
            links: doc.links,
            made_at: Utc::now(),
            scroll: RwLock::new(ScrollPos::default()),
        }
    }

    /// Returns an approximate size of the page in bytes.
    pub fn size(&self) -> usize {
        let mut b = self.content.len() + self.raw.len() + self.url.len();
        for link in &self.links {
            b += link.len();
        }
        b
    }

    /// Last scroll position stored for this page.
    pub fn scroll(&self) -> ScrollPos {
        *self.scroll.read().unwrap()
    }

    /// Remembers a scroll position for this page.
    pub fn set_scroll(&self, pos: ScrollPos) {
        *self.scroll.write().unwrap() = pos;
    }
}
