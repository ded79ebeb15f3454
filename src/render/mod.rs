//! Response classification and page construction.
//!
//! This module decides whether a response can be displayed at all, reads
//! its body under the configured size and time limits, and turns it into a
//! rendered [`Page`] via the gemtext or plain-text path.

mod gemtext;

use std::collections::HashMap;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

pub use gemtext::{render_gemtext, render_plain_text, RenderConfig};

use crate::client::Response;
use crate::config::Config;
use crate::error::FetchError;
use crate::models::{MediaType, Page};

/// Charsets that are compatible with UTF-8 and don't need to be decoded.
const UTF8_CHARSETS: &[&str] = &["", "utf-8", "us-ascii"];

fn is_utf8(charset: &str) -> bool {
    UTF8_CHARSETS.contains(&charset.to_lowercase().as_str())
}

/// Parses a response META string into a media type and its parameters.
///
/// An empty META is equal to `text/gemini; charset=utf-8` according to the
/// protocol. A META whose type part is unusable yields an empty media type,
/// which no display path accepts; unusable parameters are simply ignored.
pub fn decode_meta(meta: &str) -> (String, HashMap<String, String>) {
    let meta = meta.trim();
    if meta.is_empty() {
        return ("text/gemini".to_string(), HashMap::new());
    }

    let mut parts = meta.split(';');
    let mediatype = parts.next().unwrap_or("").trim().to_lowercase();
    if !mediatype.contains('/') {
        return (String::new(), HashMap::new());
    }

    let mut params = HashMap::new();
    for part in parts {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        params.insert(key.trim().to_lowercase(), value.to_string());
    }
    (mediatype, params)
}

/// Returns true if the response is supported for displaying on the screen.
///
/// It also doubles as a check for whether something can be stored in a
/// [`Page`]: a success status, a `text/*` media type, and a UTF-8
/// compatible charset.
pub fn can_display(res: &Response) -> bool {
    if res.status_class() != crate::client::StatusClass::Success {
        // No content
        return false;
    }
    let (mediatype, params) = decode_meta(&res.meta);
    if !mediatype.starts_with("text/") {
        return false;
    }
    is_utf8(params.get("charset").map(String::as_str).unwrap_or(""))
}

/// Reads up to `limit + 1` bytes of the body (or all of it when `limit` is
/// 0), so that exceeding the limit is detectable.
async fn read_body(res: &mut Response, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if limit == 0 {
        res.body.read_to_end(&mut buf).await?;
    } else {
        (&mut res.body)
            .take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await?;
    }
    Ok(buf)
}

/// Creates a formatted, rendered [`Page`] from a network response.
///
/// The body is read under the configured read deadline and maximum page
/// size. Exceeding either limit returns [`FetchError::TimedOut`] or
/// [`FetchError::TooLarge`]; both are recoverable: the bytes read so far
/// stay in the response's restartable stream, so the caller can restart it
/// and divert the same response into a download flow.
///
/// # Errors
///
/// Besides the limit errors above: [`FetchError::UnsupportedContent`] when
/// the response cannot be classified as displayable text or is not valid
/// UTF-8, and [`FetchError::Network`] for read failures.
pub async fn make_page(
    url: &str,
    res: &mut Response,
    width: usize,
    proxied: bool,
    config: &Config,
) -> Result<Page, FetchError> {
    if !can_display(res) {
        return Err(FetchError::UnsupportedContent(res.meta.clone()));
    }

    let limit = config.page_max_size;
    let bytes = match config.read_deadline() {
        Some(deadline) => timeout(deadline, read_body(res, limit))
            .await
            .map_err(|_| FetchError::TimedOut)??,
        None => read_body(res, limit).await?,
    };
    if limit > 0 && bytes.len() > limit {
        // Content was larger than the max size
        return Err(FetchError::TooLarge);
    }

    let text = String::from_utf8(bytes)
        .map_err(|_| FetchError::UnsupportedContent(res.meta.clone()))?;

    let (mediatype, _) = decode_meta(&res.meta);
    let render_cfg = RenderConfig {
        bullets: config.bullets,
        ansi: config.ansi,
        left_margin: config.margin_columns(),
    };

    let page = if mediatype == "text/gemini" {
        let doc = render_gemtext(&text, width, proxied, &render_cfg);
        Page::new(url, MediaType::Gemtext, mediatype, text, doc)
    } else {
        // Treated as plaintext
        let doc = render_plain_text(&text, &render_cfg);
        Page::new(url, MediaType::Plain, mediatype, text, doc)
    };
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RestartableStream;
    use rustls::pki_types::CertificateDer;
    use tokio::io::AsyncRead;

    fn response(status: u8, meta: &str, body: &[u8]) -> Response {
        Response {
            status,
            meta: meta.to_string(),
            cert: CertificateDer::from(b"stand-in certificate".to_vec()),
            body: RestartableStream::new(
                Box::new(std::io::Cursor::new(body.to_vec())) as Box<dyn AsyncRead + Send + Unpin>
            ),
        }
    }

    #[test]
    fn test_can_display() {
        assert!(can_display(&response(20, "", b"")));
        assert!(can_display(&response(20, "text/plain", b"")));
        assert!(can_display(&response(20, "text/gemini; charset=utf-8", b"")));
        // Wrong status
        assert!(!can_display(&response(51, "text/gemini", b"")));
        // Non-text or unsupported charset
        assert!(!can_display(&response(20, "image/png", b"")));
        assert!(!can_display(&response(20, "text/plain; charset=iso-8859-1", b"")));
    }

    #[tokio::test]
    async fn test_make_page_renders_gemtext() {
        let mut res = response(20, "", b"# hello\n=> gemini://x link\n");
        let config = Config::default();
        let page = make_page("gemini://example.com/", &mut res, 80, false, &config)
            .await
            .unwrap();
        assert_eq!(page.media_type, crate::models::MediaType::Gemtext);
        assert_eq!(page.links, vec!["gemini://x".to_string()]);
        assert!(page.content.starts_with("# hello\r\n"));
    }

    #[tokio::test]
    async fn test_make_page_renders_plain_text_without_links() {
        let mut res = response(20, "text/plain", b"=> gemini://x not a link\n");
        let config = Config::default();
        let page = make_page("gemini://example.com/f.txt", &mut res, 80, false, &config)
            .await
            .unwrap();
        assert_eq!(page.media_type, crate::models::MediaType::Plain);
        assert!(page.links.is_empty());
    }

    #[tokio::test]
    async fn test_make_page_too_large_keeps_stream_replayable() {
        let mut res = response(20, "text/plain", b"0123456789");
        let config = Config {
            page_max_size: 4,
            ..Config::default()
        };
        let err = make_page("gemini://example.com/", &mut res, 80, false, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge));

        // The bytes already read are replayable for the download flow
        use tokio::io::AsyncReadExt as _;
        res.body.restart();
        let mut replay = Vec::new();
        res.body.read_to_end(&mut replay).await.unwrap();
        assert_eq!(replay, b"0123456789");
    }

    #[tokio::test(start_paused = true)]
    async fn test_make_page_times_out_on_stalled_body() {
        let (client_end, _server_end) = tokio::io::duplex(64);
        let mut res = Response {
            status: 20,
            meta: String::new(),
            cert: CertificateDer::from(b"stand-in certificate".to_vec()),
            body: RestartableStream::new(
                Box::new(client_end) as Box<dyn AsyncRead + Send + Unpin>
            ),
        };
        let config = Config::default();
        let err = make_page("gemini://example.com/", &mut res, 80, false, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TimedOut));
    }

    #[tokio::test]
    async fn test_make_page_rejects_unsupported_content() {
        let mut res = response(20, "application/octet-stream", b"binary");
        let config = Config::default();
        let err = make_page("gemini://example.com/", &mut res, 80, false, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedContent(_)));

        let mut res = response(20, "text/plain", b"\xff\xfe invalid");
        let err = make_page("gemini://example.com/", &mut res, 80, false, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedContent(_)));
    }

    #[test]
    fn test_decode_meta_empty_defaults_to_gemtext() {
        let (mediatype, params) = decode_meta("");
        assert_eq!(mediatype, "text/gemini");
        assert!(params.is_empty());
    }

    #[test]
    fn test_decode_meta_with_charset() {
        let (mediatype, params) = decode_meta("text/plain; charset=US-ASCII");
        assert_eq!(mediatype, "text/plain");
        assert_eq!(params["charset"], "US-ASCII");
    }

    #[test]
    fn test_decode_meta_rejects_non_mime() {
        let (mediatype, _) = decode_meta("not a media type");
        assert!(mediatype.is_empty());
    }

    #[test]
    fn test_decode_meta_ignores_bad_params() {
        let (mediatype, params) = decode_meta("text/gemini; lang");
        assert_eq!(mediatype, "text/gemini");
        assert!(params.is_empty());
    }

    #[test]
    fn test_is_utf8_charsets() {
        assert!(is_utf8(""));
        assert!(is_utf8("UTF-8"));
        assert!(is_utf8("us-ascii"));
        assert!(!is_utf8("iso-8859-1"));
    }
}
