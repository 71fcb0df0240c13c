//! Error types for the harvester.
//!
//! Errors fall into two groups: branch-local failures (fetching or parsing a
//! single page) that the walker records and moves past, and fatal failures
//! (filesystem, cancellation, bad arguments) that abort the run.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RunSummary;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// Year outside the published range.
    #[error("Invalid year {year}: data is published for {first}..={last}")]
    InvalidYear { year: i32, first: i32, last: i32 },

    /// URL could not be parsed or joined.
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    /// Invalid crawl configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request did not complete within the configured timeout.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// Server answered with a non-success status.
    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Connection or transfer failure.
    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The page does not have the table layout expected for its level.
    #[error("Malformed page {url}: {reason}")]
    MalformedPage { url: String, reason: String },

    /// A child code does not carry its parent's prefix.
    #[error("Code {child} on {url} does not belong to parent {parent}")]
    CodeMismatch {
        url: String,
        parent: String,
        child: String,
    },

    /// Writing output failed.
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record could not be read back.
    #[error("Invalid record at {}:{line}: {source}", .path.display())]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The crawl was cancelled before it finished.
    #[error("Crawl cancelled")]
    Cancelled,

    /// Every reachable page was attempted but some branches failed.
    #[error("Crawl incomplete: {}", .0.describe_failures())]
    Incomplete(Box<RunSummary>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvesterError {
    /// Whether a fetch that failed with this error is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => (500..600).contains(status),
            Self::Network { source, .. } => !source.is_builder(),
            _ => false,
        }
    }

    /// Whether this error must abort the whole crawl rather than a single branch.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Filesystem { .. }
                | Self::Cancelled
                | Self::Io(_)
                | Self::Config(_)
                | Self::InvalidYear { .. }
        )
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarvesterError::InvalidYear {
            year: 2008,
            first: 2009,
            last: 2025,
        };
        assert_eq!(
            err.to_string(),
            "Invalid year 2008: data is published for 2009..=2025"
        );
    }

    #[test]
    fn test_transient_classification() {
        let timeout = HarvesterError::Timeout {
            url: "http://example.test/".to_string(),
        };
        assert!(timeout.is_transient());

        let server = HarvesterError::HttpStatus {
            url: "http://example.test/".to_string(),
            status: 503,
        };
        assert!(server.is_transient());

        let missing = HarvesterError::HttpStatus {
            url: "http://example.test/".to_string(),
            status: 404,
        };
        assert!(!missing.is_transient());

        let malformed = HarvesterError::MalformedPage {
            url: "http://example.test/".to_string(),
            reason: "no rows".to_string(),
        };
        assert!(!malformed.is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(HarvesterError::Cancelled.is_fatal());
        assert!(HarvesterError::filesystem(
            "/out/2020",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        )
        .is_fatal());
        assert!(!HarvesterError::Timeout {
            url: "http://example.test/".to_string()
        }
        .is_fatal());
    }
}
