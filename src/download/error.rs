//! Error types for the acquisition client.
//!
//! [`FetchError`] covers every failure mode between URL validation and the
//! transport. Inside [`crate::download::HttpClient`] these errors never
//! escape: `download()` converts them into the returned
//! [`crate::download::DownloadResult`]'s `error` string. `head()` and the
//! lower-level components surface them directly.

use std::path::PathBuf;

use thiserror::Error;

use super::rate_limit::RateLimitError;
use super::validate::ValidateError;

/// Errors that can occur while acquiring a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL was rejected by validation before any network activity.
    #[error(transparent)]
    Validation(#[from] ValidateError),

    /// The rate limiter could not serve the request (configuration fault).
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Transport-level error (DNS resolution, connection refused, TLS, a
    /// stream cut short). The source is boxed so mock transports can raise
    /// this variant too.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// File system error while persisting a response body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The client's transport pool was released via `close()`.
    #[error("client closed")]
    ClientClosed,
}

impl FetchError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a network error from any transport source.
    pub fn network(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            url: url.into(),
            source: Box::new(source),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error carrying a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// No `From<reqwest::Error>` on purpose: the variants need the URL context
// that a bare transport error does not carry. The helper constructors are
// the conversion points.
