//! HTTP acquisition engine with per-domain rate limiting.
//!
//! This module is the layer every collector depends on: it turns an
//! arbitrary URL into a [`DownloadResult`] while respecting per-domain
//! throughput limits, retrying transient failures with backoff, honoring
//! server-issued backpressure (HTTP 429 + Retry-After), and rejecting
//! requests aimed at private or internal network targets.
//!
//! # Features
//!
//! - Token-bucket rate limiting keyed by destination domain
//! - Retry with exponential backoff and jitter for transient failures
//! - Domain-wide backpressure on 429 (Retry-After honored for all callers)
//! - SSRF target rejection before any token or socket is spent
//! - Per-domain statistics with a snapshot accessor
//! - Injectable transport for socket-free testing
//!
//! # Example
//!
//! ```no_run
//! use skyfetch_core::download::{ClientConfig, HttpClient};
//!
//! # async fn example() -> Result<(), skyfetch_core::download::FetchError> {
//! let client = HttpClient::new(ClientConfig::default())?;
//! let result = client
//!     .download("https://model.example.com/{YYYYMMDD}/surface.grib2", true, None)
//!     .await;
//! println!("success: {}, retries: {}", result.success, result.retry_count);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod filename;
mod placeholder;
pub mod rate_limit;
mod result;
mod retry;
mod stats;
mod transport;
pub mod validate;

pub use client::{ClientConfig, HttpClient};
pub use error::FetchError;
pub use placeholder::{expand_placeholders, expand_placeholders_at};
pub use rate_limit::{
    RateLimitConfig, RateLimitError, RateLimiter, TokenBucket, extract_domain, parse_retry_after,
};
pub use result::DownloadResult;
pub use retry::{
    DEFAULT_RETRY_ATTEMPTS, FailureKind, RetryDecision, RetryPolicy, classify_error,
    classify_http_status,
};
pub use stats::{DomainSnapshot, DownloadStatistics, StatsSnapshot};
pub use transport::{ReqwestTransport, Transport, TransportResponse};
pub use validate::{ValidateError, validate_url};

// Note: no module-local Result aliases. Use `Result<T, FetchError>`
// explicitly in function signatures.
