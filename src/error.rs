//! Error taxonomy and error statistics for the client core.
//!
//! The library never logs user-facing messages or prompts on its own; it
//! returns a typed [`FetchError`] and lets the caller decide what to show.
//! The one hard requirement is that a trust violation is distinguishable
//! from an ordinary network failure, so the caller can offer an explicit
//! override prompt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use strum::IntoEnumIterator;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

/// Errors produced while fetching and rendering a page.
///
/// Nothing here is fatal to the process. `TooLarge` and `TimedOut` are
/// recoverable: the response stream is restarted and handed to a download
/// flow instead of being re-fetched.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The server presented a certificate whose fingerprint differs from the
    /// stored one before its recorded expiry. Possible impersonation; must
    /// not silently proceed. Only an explicit trust-store reset (after a
    /// user override) clears this state.
    #[error("server certificate for {host} does not match the trusted fingerprint")]
    TrustViolation {
        /// Host the mismatch was detected for.
        host: String,
        /// Expiry of the stored record, when one could be read.
        expiry: Option<DateTime<Utc>>,
    },

    /// Connect, read, or write failure. Never retried automatically.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// The response body exceeded the configured maximum page size.
    #[error("page content would be too large")]
    TooLarge,

    /// The read deadline expired while downloading the response body.
    #[error("page download timed out")]
    TimedOut,

    /// The response cannot be classified into a displayable media type or
    /// uses an unsupported text encoding.
    #[error("cannot display content: {0}")]
    UnsupportedContent(String),

    /// Normalization could not produce a usable address for the gemini
    /// scheme.
    #[error("malformed address: {0}")]
    MalformedAddress(String),

    /// The response header line did not match `<status><space><meta>\r\n`.
    #[error("malformed response header")]
    MalformedHeader,
}

/// Types of errors that can occur while loading a URL.
///
/// This enum categorizes failure modes for tracking and reporting purposes,
/// one variant per failure mode in the loading pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
#[allow(missing_docs)] // Variant names are self-describing
pub enum ErrorType {
    TrustViolation,
    NetworkError,
    ResponseTooLarge,
    ReadTimeout,
    UnsupportedContent,
    MalformedAddress,
    MalformedHeader,
}

impl ErrorType {
    /// Human-readable label for the error type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::TrustViolation => "Trust violation",
            ErrorType::NetworkError => "Network error",
            ErrorType::ResponseTooLarge => "Response too large",
            ErrorType::ReadTimeout => "Read timeout",
            ErrorType::UnsupportedContent => "Unsupported content",
            ErrorType::MalformedAddress => "Malformed address",
            ErrorType::MalformedHeader => "Malformed header",
        }
    }
}

impl From<&FetchError> for ErrorType {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::TrustViolation { .. } => ErrorType::TrustViolation,
            FetchError::Network(_) => ErrorType::NetworkError,
            FetchError::TooLarge => ErrorType::ResponseTooLarge,
            FetchError::TimedOut => ErrorType::ReadTimeout,
            FetchError::UnsupportedContent(_) => ErrorType::UnsupportedContent,
            FetchError::MalformedAddress(_) => ErrorType::MalformedAddress,
            FetchError::MalformedHeader => ErrorType::MalformedHeader,
        }
    }
}

/// Thread-safe error statistics tracker.
///
/// Tracks the count of each error type using atomic counters, allowing
/// concurrent access from multiple tasks. All error types are initialized to
/// zero on creation. Share across tasks with `Arc`.
pub struct ErrorStats {
    errors: HashMap<ErrorType, AtomicUsize>,
}

impl ErrorStats {
    /// Creates a tracker with every counter at zero.
    pub fn new() -> Self {
        let mut errors = HashMap::new();
        for error in ErrorType::iter() {
            errors.insert(error, AtomicUsize::new(0));
        }
        ErrorStats { errors }
    }

    /// Increments the counter for an error type.
    pub fn increment(&self, error: ErrorType) {
        // All ErrorType variants are initialized in new()
        self.errors
            .get(&error)
            .unwrap()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current count for an error type.
    pub fn get_count(&self, error: ErrorType) -> usize {
        // All ErrorType variants are initialized in new()
        self.errors.get(&error).unwrap().load(Ordering::SeqCst)
    }
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_stats_counts_increments() {
        let stats = ErrorStats::new();
        assert_eq!(stats.get_count(ErrorType::NetworkError), 0);
        stats.increment(ErrorType::NetworkError);
        stats.increment(ErrorType::NetworkError);
        stats.increment(ErrorType::ReadTimeout);
        assert_eq!(stats.get_count(ErrorType::NetworkError), 2);
        assert_eq!(stats.get_count(ErrorType::ReadTimeout), 1);
    }

    #[test]
    fn test_error_type_from_fetch_error() {
        let err = FetchError::TimedOut;
        assert_eq!(ErrorType::from(&err), ErrorType::ReadTimeout);
        let err = FetchError::TrustViolation {
            host: "example.com".into(),
            expiry: None,
        };
        assert_eq!(ErrorType::from(&err), ErrorType::TrustViolation);
    }
}
