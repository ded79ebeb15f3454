//! Functions that transform and normalize URLs.
//!
//! Normalization makes URLs that are different strings but point to the same
//! place all look the same, so they can be used as cache and trust-store
//! keys no matter how they were written.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::config::GEMINI_DEFAULT_PORT;

/// Takes a user-typed URL and adds a gemini scheme to it if necessary.
///
/// It is not the same as [`normalize_url`], and that function should still
/// be used afterward.
///
/// For example `"example.com"` becomes `"gemini://example.com"`, but
/// `"//example.com"` is left untouched.
pub fn fix_user_url(u: &str) -> String {
    if !u.starts_with("//") && !u.starts_with("gemini://") && !u.contains("://") {
        // Assume it's a Gemini URL
        format!("gemini://{u}")
    } else {
        u.to_string()
    }
}

/// See doc for [`normalize_url`].
fn normalize_parsed(u: &str) -> Result<Url, String> {
    let u: String = u.trim().nfc().collect();

    let u = fix_user_url(&u);
    let with_scheme = if let Some(rest) = u.strip_prefix("//") {
        format!("gemini://{rest}")
    } else {
        u
    };

    let mut parsed = match Url::parse(&with_scheme) {
        Ok(parsed) => parsed,
        Err(_) => return Err(with_scheme),
    };

    if parsed.scheme() != "gemini" {
        // Not a gemini URL, nothing to do
        return Err(with_scheme);
    }

    // Encode the hostname to its ASCII-compatible (punycode) form. The url
    // crate treats gemini as a non-special scheme and leaves the host
    // opaque, so this has to be done explicitly.
    if let Some(host) = parsed.host_str() {
        if !host.is_empty() && !host.starts_with('[') {
            let decoded = percent_decode_str(host)
                .decode_utf8()
                .unwrap_or(Cow::Borrowed(host));
            if let Ok(ascii) = idna::domain_to_ascii(&decoded) {
                let _ = parsed.set_host(Some(&ascii));
            }
        }
    }

    // No passwords in Gemini, no fragments either
    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_fragment(None);

    // Always remove the default port
    if parsed.port() == Some(GEMINI_DEFAULT_PORT) {
        let _ = parsed.set_port(None);
    }

    // Add slash to the end of a URL with just a domain
    // gemini://example.com -> gemini://example.com/
    if parsed.path().is_empty() {
        parsed.set_path("/");
    } else {
        // Decode and re-encode the path. This removes needless encoding,
        // like that of ASCII chars, and encodes anything that wasn't but
        // should've been.
        if let Ok(decoded) = percent_decode_str(parsed.path()).decode_utf8() {
            let decoded = decoded.into_owned();
            parsed.set_path(&decoded);
        }
    }

    // Do the same to the query string
    if let Some(query) = parsed.query() {
        if let Ok(decoded) = percent_decode_str(query).decode_utf8() {
            let decoded = decoded.into_owned();
            parsed.set_query(Some(&decoded));
        }
    }

    Ok(parsed)
}

/// Attempts to make URLs that are different strings but point to the same
/// place all look the same.
///
/// Example: `gemini://gus.guru:1965/` and `//gus.guru/`. This function will
/// take both and output the same URL each time.
///
/// It will also percent-encode invalid characters, and decode chars that
/// don't need to be encoded. It will also apply Unicode NFC normalization.
///
/// The string passed must already be confirmed to be a URL. Detection of a
/// search string vs. a URL must happen elsewhere.
///
/// Non-gemini URLs are returned essentially unchanged beyond trimming and
/// scheme fixing, as are strings no step of normalization can make sense of.
pub fn normalize_url(u: &str) -> String {
    match normalize_parsed(u) {
        Ok(parsed) => parsed.to_string(),
        // Return the best URL available up to that point
        Err(best) => best,
    }
}
