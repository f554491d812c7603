//! The acquisition client: validation, rate limiting, retries, persistence.
//!
//! [`HttpClient`] is the single entry point collectors use. It turns an
//! arbitrary URL (possibly a template with date placeholders) into a
//! [`DownloadResult`], never raising past its boundary: validation
//! rejections, rate-limit faults, timeouts, HTTP errors, and persistence
//! failures all come back as a failed result with a descriptive `error`
//! string.
//!
//! # Example
//!
//! ```no_run
//! use skyfetch_core::download::{ClientConfig, HttpClient};
//!
//! # async fn example() -> Result<(), skyfetch_core::download::FetchError> {
//! let client = HttpClient::new(ClientConfig::default())?;
//! let result = client
//!     .download("https://tides.example.org/{YYYYMMDD}/table.csv", true, None)
//!     .await;
//! if result.success {
//!     println!("saved to {:?}", result.file_path);
//! } else {
//!     eprintln!("failed: {:?}", result.error);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::FetchError;
use super::filename::save_path_for;
use super::placeholder::expand_placeholders;
use super::rate_limit::{RateLimitConfig, RateLimiter, extract_domain, parse_retry_after};
use super::result::DownloadResult;
use super::retry::{
    DEFAULT_RETRY_ATTEMPTS, FailureKind, RetryDecision, RetryPolicy, classify_error,
};
use super::stats::{DownloadStatistics, StatsSnapshot};
use super::transport::{ReqwestTransport, Transport, TransportResponse};
use crate::user_agent;

/// Retry-After assumed when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest a single download will sleep on a server-directed delay before
/// retrying; the domain-wide block still honors the full value for other
/// callers.
const RETRY_AFTER_SLEEP_CAP: Duration = Duration::from_secs(120);

/// Construction-time configuration for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Default concurrency cap for [`HttpClient::download_multiple`].
    pub max_concurrent: usize,
    /// Retries allowed after the initial attempt.
    pub retry_attempts: u32,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Root under which per-domain subdirectories are created.
    pub output_dir: PathBuf,
    /// Default per-domain throughput limit.
    pub rate_limit: RateLimitConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_concurrent: 5,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            user_agent: user_agent::default_user_agent(),
            output_dir: PathBuf::from("data"),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// HTTP acquisition client shared by all collectors.
///
/// Cheap to clone: clones share the transport pool, the rate limiter, and
/// the statistics registry.
#[derive(Debug, Clone)]
pub struct HttpClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    rate_limiter: Arc<RateLimiter>,
    stats: Arc<DownloadStatistics>,
}

impl HttpClient {
    /// Creates a client with its own transport pool and rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RateLimit`] for an unusable rate-limit config
    /// or [`FetchError::Network`] if the transport cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, FetchError> {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit)?);
        Self::with_rate_limiter(config, rate_limiter)
    }

    /// Creates a client sharing an externally owned rate limiter.
    ///
    /// Collectors that each build their own client use this to keep one
    /// process-wide set of domain buckets.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the transport cannot be built.
    pub fn with_rate_limiter(
        config: ClientConfig,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, FetchError> {
        let transport = Arc::new(ReqwestTransport::new(config.timeout, &config.user_agent)?);
        Ok(Self::with_transport(config, transport, rate_limiter))
    }

    /// Creates a client over an injected transport.
    ///
    /// This is the seam tests use to exercise retry and classification
    /// behavior deterministically without sockets.
    #[must_use]
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            rate_limiter,
            stats: Arc::new(DownloadStatistics::new()),
        }
    }

    /// The shared rate limiter, for registering domain-specific limits.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Point-in-time statistics aggregate.
    #[must_use]
    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Releases the pooled transport. Idempotent.
    ///
    /// Outstanding downloads finish under their own per-attempt timeouts;
    /// downloads started afterwards fail with a "client closed" result.
    pub fn close(&self) {
        self.transport.shutdown();
    }

    /// Downloads a URL, returning the outcome as a value.
    ///
    /// Never panics and never returns `Err` — every failure mode is encoded
    /// in the returned [`DownloadResult`]. Placeholder tokens in the URL are
    /// expanded against the current UTC time first.
    #[instrument(skip(self, custom_file_path), fields(domain))]
    pub async fn download(
        &self,
        url: &str,
        save_to_disk: bool,
        custom_file_path: Option<PathBuf>,
    ) -> DownloadResult {
        let started = Instant::now();

        let expanded = expand_placeholders(url);
        let mut result = DownloadResult::started(expanded.clone(), extract_domain(&expanded));
        tracing::Span::current().record("domain", &result.domain);

        self.run_download(&expanded, save_to_disk, custom_file_path, &mut result)
            .await;

        result.download_time = started.elapsed();
        if result.success {
            self.stats.record_success(&result.domain);
        } else {
            self.stats.record_error(&result.domain);
            debug!(
                url = %result.url,
                error = result.error.as_deref().unwrap_or("unknown"),
                "download failed"
            );
        }
        result
    }

    /// Downloads several URLs concurrently.
    ///
    /// At most `max_concurrent` (default: the client's configured
    /// concurrency) downloads are in flight at once; each is independently
    /// rate-limited and retried. Results are keyed by the URL as given.
    /// There is no ordering guarantee across URLs.
    #[instrument(skip(self, urls), fields(count = urls.len()))]
    pub async fn download_multiple(
        &self,
        urls: &[String],
        save_to_disk: bool,
        max_concurrent: Option<usize>,
    ) -> HashMap<String, DownloadResult> {
        let cap = max_concurrent.unwrap_or(self.config.max_concurrent).max(1);
        let gate = Arc::new(Semaphore::new(cap));
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            // Admission gate: suspend here once `cap` downloads are in flight
            let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                // The semaphore is never closed while we hold it
                break;
            };
            let client = self.clone();
            let url = url.clone();
            handles.push((
                url.clone(),
                tokio::spawn(async move {
                    let _permit = permit;
                    client.download(&url, save_to_disk, None).await
                }),
            ));
        }

        let mut results = HashMap::with_capacity(handles.len());
        for (url, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(url = %url, error = %join_error, "download task aborted");
                    let mut result = DownloadResult::started(url.clone(), extract_domain(&url));
                    result.fail(format!("download task aborted: {join_error}"));
                    result
                }
            };
            results.insert(url, result);
        }
        results
    }

    /// Issues a HEAD request through the same validation and rate-limiting
    /// path as `download`, with no retry and no body.
    ///
    /// # Errors
    ///
    /// Returns the validation, rate-limit, or transport error directly.
    #[instrument(skip(self))]
    pub async fn head(&self, url: &str) -> Result<(u16, HashMap<String, String>), FetchError> {
        let expanded = expand_placeholders(url);
        let validated = super::validate::validate_url(&expanded)?;
        let domain = extract_domain(validated.as_str());

        let waited = self.rate_limiter.acquire(&domain).await?;
        self.stats.record_wait(&domain, waited);

        let response = self.transport.head(validated.as_str()).await?;
        Ok((response.status, response.headers))
    }

    /// Validation, rate-limit acquisition, and the attempt loop.
    ///
    /// Fills in `result`; the caller owns timing and statistics.
    async fn run_download(
        &self,
        expanded_url: &str,
        save_to_disk: bool,
        custom_file_path: Option<PathBuf>,
        result: &mut DownloadResult,
    ) {
        // Validation is terminal: no retry, no rate-limit token spent
        let validated = match super::validate::validate_url(expanded_url) {
            Ok(url) => url,
            Err(rejection) => {
                result.fail(rejection.to_string());
                return;
            }
        };
        result.domain = extract_domain(validated.as_str());

        match self.rate_limiter.acquire(&result.domain).await {
            Ok(waited) => {
                result.wait_time = waited;
                self.stats.record_wait(&result.domain, waited);
            }
            Err(fault) => {
                // Configuration fault, terminal like a validation rejection
                result.fail(fault.to_string());
                return;
            }
        }

        self.attempt_loop(&validated, save_to_disk, custom_file_path, result)
            .await;
    }

    /// Runs up to `retry_attempts + 1` transport attempts, classifying each
    /// response and sleeping between retries.
    async fn attempt_loop(
        &self,
        url: &Url,
        save_to_disk: bool,
        custom_file_path: Option<PathBuf>,
        result: &mut DownloadResult,
    ) {
        let policy = RetryPolicy::with_retry_attempts(self.config.retry_attempts);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, "attempting download");

            let error = match self.transport.get(url.as_str()).await {
                Ok(response) if response.status == 200 => {
                    self.finish_success(
                        url,
                        response,
                        save_to_disk,
                        custom_file_path.clone(),
                        result,
                    )
                    .await;
                    return;
                }
                Ok(response) => {
                    result.status_code = Some(response.status);
                    result.headers = response.headers.clone();
                    let retry_after = response.header("retry-after").map(str::to_string);
                    FetchError::http_status_with_retry_after(
                        url.as_str(),
                        response.status,
                        retry_after,
                    )
                }
                Err(transport_error) => transport_error,
            };

            let kind = classify_error(&error);

            // 429 arms domain-wide backpressure for every caller, even when
            // this download is out of attempts
            let server_delay = if kind == FailureKind::RateLimited {
                let delay = retry_after_from(&error).unwrap_or(DEFAULT_RETRY_AFTER);
                self.rate_limiter
                    .block_domain(&result.domain, Instant::now() + delay)
                    .await;
                result.fail(format!(
                    "Rate limited by {} (HTTP 429), retry after {}s",
                    result.domain,
                    delay.as_secs()
                ));
                Some(delay.min(RETRY_AFTER_SLEEP_CAP))
            } else {
                result.fail(error.to_string());
                None
            };

            match policy.should_retry(kind, attempt) {
                RetryDecision::Retry {
                    delay: backoff,
                    attempt: next_attempt,
                } => {
                    let delay = server_delay.unwrap_or(backoff);
                    info!(
                        url = %url,
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        server_directed = server_delay.is_some(),
                        error = %error,
                        "retrying download"
                    );
                    result.retry_count += 1;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, %reason, "not retrying download");
                    return;
                }
            }
        }
    }

    /// Finalizes a 200 response: size accounting, optional persistence.
    async fn finish_success(
        &self,
        url: &Url,
        response: TransportResponse,
        save_to_disk: bool,
        custom_file_path: Option<PathBuf>,
        result: &mut DownloadResult,
    ) {
        result.status_code = Some(response.status);
        result.content_type = response.content_type().map(str::to_string);

        let body = response.body;
        result.headers = response.headers;
        result.size_bytes = Some(accounted_size(&body, result.content_type.as_deref()));

        if save_to_disk {
            let path = custom_file_path.unwrap_or_else(|| {
                save_path_for(&self.config.output_dir, url, result.content_type.as_deref())
            });
            if let Err(io_error) = persist(&path, &body).await {
                result.content = Some(body);
                result.fail(io_error.to_string());
                return;
            }
            debug!(path = %path.display(), bytes = body.len(), "persisted download");
            result.file_path = Some(path);
        }

        result.content = Some(body);
        result.error = None;
        result.success = true;
    }
}

/// Writes a body to disk, creating the parent directory on demand.
async fn persist(path: &std::path::Path, body: &[u8]) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(parent, e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| FetchError::io(path, e))
}

/// Extracts a parsed Retry-After delay from a 429 error, if any.
fn retry_after_from(error: &FetchError) -> Option<Duration> {
    match error {
        FetchError::HttpStatus { retry_after, .. } => {
            retry_after.as_deref().and_then(parse_retry_after)
        }
        _ => None,
    }
}

/// Body size recorded on the result.
///
/// JSON bodies are measured after semantic compaction so pretty-printed and
/// compact responses account identically; anything else is the raw length.
fn accounted_size(body: &[u8], content_type: Option<&str>) -> u64 {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
        && let Ok(value) = serde_json::from_slice::<serde_json::Value>(body)
        && let Ok(compact) = serde_json::to_vec(&value)
    {
        return compact.len() as u64;
    }
    body.len() as u64
}
