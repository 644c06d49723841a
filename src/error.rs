//! Custom error types for gscraper.
//!
//! Every fallible operation in the library returns `Result<T, ScraperError>`.
//! The retry driver uses [`ScraperError::is_retryable`] to decide whether a
//! failed attempt is worth repeating after a recovery action.

use thiserror::Error;

/// Main error type for gscraper operations.
#[derive(Debug, Error)]
pub enum ScraperError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML or payload parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by an upstream service
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Upstream returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message
        message: String,
    },

    /// CAPTCHA or "unusual traffic" page served instead of results
    #[error("CAPTCHA detected, change egress or refresh cookies")]
    Captcha,

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV store error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A search hit is missing fields the pipeline needs
    #[error("Malformed upstream item at rank {rank}: {reason}")]
    MalformedItem {
        /// Stream rank of the offending item
        rank: u32,
        /// What was missing
        reason: String,
    },

    /// An upstream service could not be reached or answered unusably
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The retry budget of an operation ran out
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        /// Operation label
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Message of the final failure
        last_error: String,
    },

    /// No author in the reconciled list could be split into given/family
    #[error("Cannot split author names from '{authors}'")]
    AuthorSplit {
        /// Raw author display string of the entry
        authors: String,
    },

    /// The operator declined to continue during recovery
    #[error("Run aborted by operator")]
    Aborted,
}

impl ScraperError {
    /// Whether another attempt (after a recovery action) may succeed.
    ///
    /// Transient upstream failures and malformed items are retryable; local
    /// I/O, configuration, author-split failures and operator aborts are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::Parse(_)
            | Self::RateLimited(_)
            | Self::Api { .. }
            | Self::Captcha
            | Self::Json(_)
            | Self::MalformedItem { .. }
            | Self::UpstreamUnavailable(_) => true,
            Self::Io(_)
            | Self::Csv(_)
            | Self::Config(_)
            | Self::Validation(_)
            | Self::ExhaustedRetries { .. }
            | Self::AuthorSplit { .. }
            | Self::Aborted => false,
        }
    }
}

/// Result type alias using `ScraperError`
pub type Result<T> = std::result::Result<T, ScraperError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ScraperError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ScraperError::RateLimited(60).is_retryable());
        assert!(ScraperError::Captcha.is_retryable());
        assert!(ScraperError::MalformedItem {
            rank: 3,
            reason: "missing title".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        assert!(!ScraperError::Aborted.is_retryable());
        assert!(!ScraperError::AuthorSplit {
            authors: "X".to_string()
        }
        .is_retryable());
        assert!(!ScraperError::Io(std::io::Error::other("disk")).is_retryable());
    }

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<u32> = None;
        assert!(matches!(
            missing.ok_or_parse("no value"),
            Err(ScraperError::Parse(msg)) if msg == "no value"
        ));
    }
}
