//! Converts text/gemini into wrapped, link-annotated display content.
//!
//! Rendered lines always end with \r\n, in an effort to be Windows
//! compatible.

use std::sync::LazyLock;

use regex::Regex;
use textwrap::Options;
use url::Url;

use crate::models::{LineStyle, RenderedDocument};

// Regex for identifying ANSI color codes
static ANSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static regex"));

/// Options consumed by the renderer, distilled from [`crate::Config`].
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Replace the asterisk of list items with a Unicode bullet.
    pub bullets: bool,
    /// Keep ANSI escape sequences in preformatted blocks instead of
    /// stripping them.
    pub ansi: bool,
    /// Blank columns prepended to every output line.
    pub left_margin: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            bullets: true,
            ansi: true,
            left_margin: 0,
        }
    }
}

fn strip_ansi(s: &str) -> String {
    ANSI_REGEX.replace_all(s, "").into_owned()
}

/// Wraps a line to the provided width, applying the given prefixes to the
/// first and to every following wrapped line. The prefixes count toward the
/// width. It cannot fail: a word longer than the width is emitted unbroken
/// on its own line. Returned lines have no line endings.
fn wrap_line(line: &str, width: usize, first_prefix: &str, subsequent_prefix: &str) -> Vec<String> {
    let options = Options::new(width.max(1))
        .initial_indent(first_prefix)
        .subsequent_indent(subsequent_prefix)
        .break_words(false);
    textwrap::wrap(line, options)
        .into_iter()
        .map(|cow| cow.into_owned())
        .collect()
}

/// Returns whether a link target stays inside the gemini scheme. Relative
/// URLs count as native; everything is foreign when the page itself came
/// through a proxy.
fn is_foreign_link(target: &str, proxied: bool) -> bool {
    if proxied {
        return true;
    }
    match Url::parse(target) {
        Ok(parsed) => !matches!(parsed.scheme(), "gemini" | "about"),
        // Relative link, resolved against a gemini page
        Err(_) => false,
    }
}

/// Accumulates output lines, then assembles the final document with margins
/// and line endings applied.
struct DocBuilder {
    lines: Vec<(String, LineStyle)>,
    links: Vec<String>,
}

impl DocBuilder {
    fn new() -> Self {
        DocBuilder {
            lines: Vec::new(),
            links: Vec::new(),
        }
    }

    fn push(&mut self, text: String, style: LineStyle) {
        self.lines.push((text, style));
    }

    fn push_wrapped(
        &mut self,
        line: &str,
        width: usize,
        first_prefix: &str,
        subsequent_prefix: &str,
        style: LineStyle,
    ) {
        for wrapped in wrap_line(line, width, first_prefix, subsequent_prefix) {
            self.lines.push((wrapped, style));
        }
    }

    fn finish(self, left_margin: usize) -> RenderedDocument {
        let margin = " ".repeat(left_margin);
        let mut content = String::new();
        let mut styles = Vec::with_capacity(self.lines.len());
        for (text, style) in self.lines {
            content.push_str(&margin);
            content.push_str(&text);
            content.push_str("\r\n");
            styles.push(style);
        }
        RenderedDocument {
            content,
            styles,
            links: self.links,
        }
    }
}

/// Converts a non-preformatted line into zero or more output lines.
fn convert_regular_line(doc: &mut DocBuilder, line: &str, width: usize, proxied: bool, cfg: &RenderConfig) {
    // ANSI not allowed in regular text
    let line = strip_ansi(line);
    let line = line.trim_end_matches([' ', '\r', '\t', '\n']);

    if line.starts_with('#') {
        // Headings: checks run least-specific first and later matches
        // overwrite, so the longest prefix's styling wins
        let mut style = LineStyle::Heading1;
        if line.starts_with("##") {
            style = LineStyle::Heading2;
        }
        if line.starts_with("###") {
            style = LineStyle::Heading3;
        }
        doc.push_wrapped(line, width, "", "", style);
    } else if line.starts_with("=>") && line.chars().count() >= 3 {
        // Trim whitespace and separate the address from the label
        let rest = line[2..].trim_matches([' ', '\t']);
        if rest.is_empty() {
            // Link was just whitespace, reset it and move on
            doc.push("=>".to_string(), LineStyle::Text);
            return;
        }

        let (target, label) = match rest.find([' ', '\t']) {
            // There is a label
            Some(delim) => (&rest[..delim], rest[delim..].trim_matches([' ', '\t'])),
            // No label, the address doubles as one
            None => (rest, rest),
        };

        doc.links.push(target.to_string());
        let number = doc.links.len(); // Visible link number, one-indexed

        // One-digit and two-digit links get the same spacing
        let spacing = if number > 9 { " " } else { "  " };
        let foreign = is_foreign_link(target, proxied);

        // Link lines are excluded from word-wrapping
        doc.push(
            format!("[{number}]{spacing}{label}"),
            LineStyle::Link { number, foreign },
        );
    } else if let Some(item) = line.strip_prefix("* ") {
        let glyph = if cfg.bullets { '\u{2022}' } else { '*' };
        // Wrap the item and indent wrapped lines past the bullet
        doc.push_wrapped(item, width, &format!(" {glyph} "), "    ", LineStyle::Bullet);
    } else if let Some(quoted) = line.strip_prefix('>') {
        if quoted.is_empty() {
            // Just an empty quote line
            doc.push(">".to_string(), LineStyle::Quote);
        } else {
            // Remove the space after the quote mark, then re-add the marker
            // to the start of each wrapped line
            let quoted = quoted.strip_prefix(' ').unwrap_or(quoted);
            doc.push_wrapped(quoted, width, "> ", "> ", LineStyle::Quote);
        }
    } else if line.trim().is_empty() {
        // Just add the empty line without processing
        doc.push(String::new(), LineStyle::Text);
    } else {
        // Regular line, just wrap it
        doc.push_wrapped(line, width, "", "", LineStyle::Text);
    }
}

/// Converts text/gemini into a displayable document.
///
/// `width` is the number of columns to wrap to; preformatted blocks are
/// never wrapped. `proxied` is whether the request was made through a
/// proxy rather than the gemini:// scheme: it affects link classification
/// only.
///
/// The function is pure: identical input always yields byte-identical
/// output.
pub fn render_gemtext(raw: &str, width: usize, proxied: bool, cfg: &RenderConfig) -> RenderedDocument {
    let mut doc = DocBuilder::new();
    let mut pre = false;

    let mut lines: Vec<&str> = raw.split('\n').collect();
    // A trailing newline is a line terminator, not an extra blank line
    if lines.last() == Some(&"") && lines.len() > 1 {
        lines.pop();
    }

    for line in lines {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with("```") {
            // Fence lines toggle preformatting and are dropped
            pre = !pre;
            continue;
        }

        if pre {
            // Verbatim, except for ANSI stripping when disabled
            let text = if cfg.ansi {
                line.to_string()
            } else {
                strip_ansi(line)
            };
            doc.push(text, LineStyle::Preformatted);
        } else {
            convert_regular_line(&mut doc, line, width, proxied, cfg);
        }
    }

    doc.finish(cfg.left_margin)
}

/// Formats a plain text page: lines pass through unwrapped, with line
/// endings normalized and the margin applied. No links are extracted.
pub fn render_plain_text(raw: &str, cfg: &RenderConfig) -> RenderedDocument {
    let mut doc = DocBuilder::new();

    let mut lines: Vec<&str> = raw.split('\n').collect();
    if lines.last() == Some(&"") && lines.len() > 1 {
        lines.pop();
    }

    for line in lines {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let text = if cfg.ansi {
            line.to_string()
        } else {
            strip_ansi(line)
        };
        doc.push(text, LineStyle::Text);
    }

    doc.finish(cfg.left_margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RenderConfig {
        RenderConfig::default()
    }

    fn render(raw: &str, width: usize) -> RenderedDocument {
        render_gemtext(raw, width, false, &cfg())
    }

    #[test]
    fn test_preformatted_block_is_verbatim_at_any_width() {
        let raw = "```\nthis line is much longer than ten columns and stays whole\n```\n";
        for width in [10, 40, 200] {
            let doc = render(raw, width);
            assert_eq!(
                doc.content,
                "this line is much longer than ten columns and stays whole\r\n"
            );
            assert_eq!(doc.styles, vec![LineStyle::Preformatted]);
        }
    }

    #[test]
    fn test_unclosed_fence_runs_to_end_of_input() {
        let doc = render("```\na\nb", 80);
        assert_eq!(doc.content, "a\r\nb\r\n");
        assert_eq!(doc.styles.len(), 2);
    }

    #[test]
    fn test_heading_longest_prefix_wins() {
        let doc = render("# one\n## two\n### three\n", 80);
        assert_eq!(
            doc.styles,
            vec![LineStyle::Heading1, LineStyle::Heading2, LineStyle::Heading3]
        );
        assert_eq!(doc.content, "# one\r\n## two\r\n### three\r\n");
    }

    #[test]
    fn test_link_line_increments_counter_and_keeps_label_adjacent() {
        let doc = render("=> gemini://example.com/ Example\n=> /relative\n", 80);
        assert_eq!(doc.links.len(), 2);
        assert_eq!(doc.links[0], "gemini://example.com/");
        assert_eq!(doc.links[1], "/relative");
        assert_eq!(doc.content, "[1]  Example\r\n[2]  /relative\r\n");
        assert_eq!(
            doc.styles[0],
            LineStyle::Link {
                number: 1,
                foreign: false
            }
        );
    }

    #[test]
    fn test_link_classification() {
        let doc = render("=> https://example.com web\n=> gemini://x native\n", 80);
        assert_eq!(
            doc.styles[0],
            LineStyle::Link {
                number: 1,
                foreign: true
            }
        );
        assert_eq!(
            doc.styles[1],
            LineStyle::Link {
                number: 2,
                foreign: false
            }
        );

        // Everything is foreign when proxied
        let doc = render_gemtext("=> gemini://x native\n", 80, true, &cfg());
        assert_eq!(
            doc.styles[0],
            LineStyle::Link {
                number: 1,
                foreign: true
            }
        );
    }

    #[test]
    fn test_blank_link_line_consumes_no_number() {
        let doc = render("=> \t \n=> gemini://example.com/\n", 80);
        assert_eq!(doc.links.len(), 1);
        assert_eq!(doc.content, "=>\r\n[1]  gemini://example.com/\r\n");
    }

    #[test]
    fn test_two_digit_links_use_single_space() {
        let mut raw = String::new();
        for i in 0..10 {
            raw.push_str(&format!("=> gemini://example.com/{i} l{i}\n"));
        }
        let doc = render(&raw, 80);
        let lines: Vec<&str> = doc.content.split("\r\n").collect();
        assert!(lines[8].starts_with("[9]  l8"));
        assert!(lines[9].starts_with("[10] l9"));
    }

    #[test]
    fn test_bullet_glyph_configurable() {
        let doc = render("* item\n", 80);
        assert_eq!(doc.content, " \u{2022} item\r\n");
        assert_eq!(doc.styles, vec![LineStyle::Bullet]);

        let plain = RenderConfig {
            bullets: false,
            ..cfg()
        };
        let doc = render_gemtext("* item\n", 80, false, &plain);
        assert_eq!(doc.content, " * item\r\n");
    }

    #[test]
    fn test_quote_marker_on_every_wrapped_line() {
        let doc = render("> alpha beta gamma delta\n", 14);
        for line in doc.content.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.starts_with("> "), "line {line:?} lacks quote marker");
        }
        assert!(doc.styles.iter().all(|s| *s == LineStyle::Quote));
        assert!(doc.styles.len() > 1);
    }

    #[test]
    fn test_empty_quote_line() {
        let doc = render(">\n", 80);
        assert_eq!(doc.content, ">\r\n");
        assert_eq!(doc.styles, vec![LineStyle::Quote]);
    }

    #[test]
    fn test_word_wrap_and_overlong_tokens() {
        let doc = render("aa bb cc\n", 5);
        assert_eq!(doc.content, "aa bb\r\ncc\r\n");

        // A token longer than the width is emitted unbroken
        let doc = render("abcdefghij\n", 5);
        assert_eq!(doc.content, "abcdefghij\r\n");
    }

    #[test]
    fn test_line_endings_normalized() {
        let doc = render("one\r\ntwo\nthree", 80);
        assert_eq!(doc.content, "one\r\ntwo\r\nthree\r\n");
    }

    #[test]
    fn test_left_margin_applied_to_every_line() {
        let margined = RenderConfig {
            left_margin: 3,
            ..cfg()
        };
        let doc = render_gemtext("text\n\n```\npre\n```\n", 80, false, &margined);
        assert_eq!(doc.content, "   text\r\n   \r\n   pre\r\n");
    }

    #[test]
    fn test_ansi_stripped_from_regular_text() {
        let doc = render("\x1b[1mbold\x1b[0m words\n", 80);
        assert_eq!(doc.content, "bold words\r\n");
    }

    #[test]
    fn test_ansi_kept_in_preformatted_when_enabled() {
        let raw = "```\n\x1b[31mred\x1b[0m\n```\n";
        let doc = render(raw, 80);
        assert_eq!(doc.content, "\x1b[31mred\x1b[0m\r\n");

        let stripped = RenderConfig {
            ansi: false,
            ..cfg()
        };
        let doc = render_gemtext(raw, 80, false, &stripped);
        assert_eq!(doc.content, "red\r\n");
    }

    #[test]
    fn test_render_is_pure() {
        let raw = "# head\n=> gemini://x label\nbody text that wraps around\n";
        let a = render(raw, 20);
        let b = render(raw, 20);
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_plain_text_passes_through() {
        let doc = render_plain_text("no => link\n# no heading\n", &cfg());
        assert_eq!(doc.content, "no => link\r\n# no heading\r\n");
        assert!(doc.links.is_empty());
        assert!(doc.styles.iter().all(|s| *s == LineStyle::Text));
    }
}
