//! Per-domain token-bucket rate limiting for acquisition requests.
//!
//! This module provides the [`RateLimiter`] registry which owns one
//! [`TokenBucket`] per destination domain, enforcing per-domain throughput
//! limits so collectors never overwhelm the upstream data servers.
//!
//! # Overview
//!
//! Rate limiting is applied per-domain, meaning requests to different domains
//! can proceed in parallel without waiting for each other. Only concurrent
//! requests to the *same* domain serialize on that domain's bucket.
//!
//! Each bucket holds a capped reservoir of tokens that refills continuously
//! at the configured rate. A request spends one token; when the reservoir is
//! empty the caller suspends until enough tokens have accumulated. A server
//! that answers 429 can additionally block the whole domain until a given
//! deadline via [`RateLimiter::block_domain`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use skyfetch_core::download::{RateLimitConfig, RateLimiter};
//!
//! # async fn example() -> Result<(), skyfetch_core::download::RateLimitError> {
//! let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(2.0, 5))?);
//!
//! // Burst capacity: the first few requests proceed immediately
//! limiter.acquire("https://forecast.example.com/model.json").await?;
//!
//! // Requests to a different domain never contend
//! limiter.acquire("https://tides.example.org/table.html").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Errors raised by rate limiter configuration.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The supplied configuration is unusable.
    #[error("invalid rate limit config for {scope}: {reason}")]
    InvalidConfig {
        /// Which configuration failed ("default" or a domain name).
        scope: String,
        /// Why validation rejected it.
        reason: String,
    },
}

impl RateLimitError {
    fn invalid(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            scope: scope.into(),
            reason: reason.into(),
        }
    }
}

/// Throughput limit for one destination domain.
///
/// `requests_per_second` is the sustained refill rate; `burst_size` caps how
/// many requests may go out back-to-back after an idle period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request rate (tokens refilled per second). Must be > 0.
    pub requests_per_second: f64,
    /// Reservoir capacity (maximum burst). Must be > 0.
    pub burst_size: u32,
}

impl RateLimitConfig {
    /// Creates a new config with the given sustained rate and burst capacity.
    #[must_use]
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] if the rate is not a
    /// positive finite number or the burst capacity is zero.
    pub fn validate(&self, scope: &str) -> Result<(), RateLimitError> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(RateLimitError::invalid(
                scope,
                format!(
                    "requests_per_second must be a positive finite number, got {}",
                    self.requests_per_second
                ),
            ));
        }
        if self.burst_size == 0 {
            return Err(RateLimitError::invalid(scope, "burst_size must be > 0"));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    /// One request per second with a burst of five — a courteous default for
    /// public weather data servers.
    fn default() -> Self {
        Self::new(1.0, 5)
    }
}

/// Token bucket for one domain.
///
/// The bucket starts full. All mutation happens inside a single
/// `tokio::sync::Mutex` critical section, so concurrent acquirers on the same
/// domain serialize while acquirers on different domains never contend.
#[derive(Debug)]
pub struct TokenBucket {
    inner: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    config: RateLimitConfig,
    /// Current reservoir level. Invariant: `0 <= tokens <= burst_size`.
    tokens: f64,
    last_refill: Instant,
    /// Server-mandated block deadline. `None` when not blocked.
    blocked_until: Option<Instant>,
}

impl BucketState {
    /// Credits tokens for the time elapsed since the last refill, capped at
    /// the burst capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = self.tokens + elapsed.as_secs_f64() * self.config.requests_per_second;
        self.tokens = refilled.min(f64::from(self.config.burst_size));
        self.last_refill = now;
    }
}

impl TokenBucket {
    /// Creates a full bucket with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Mutex::new(BucketState {
                tokens: f64::from(config.burst_size),
                config,
                last_refill: Instant::now(),
                blocked_until: None,
            }),
        }
    }

    /// Acquires `tokens_needed` tokens, suspending until they are available.
    ///
    /// Returns the wall-clock time spent waiting inside this call. The wait
    /// covers any active server-mandated block plus the time for the
    /// reservoir to refill to the requested level.
    ///
    /// Requests larger than the burst capacity are clamped to it; such a
    /// request could otherwise never be satisfied.
    pub async fn acquire(&self, tokens_needed: f64) -> Duration {
        let started = Instant::now();
        let mut state = self.inner.lock().await;

        let tokens_needed = {
            let capacity = f64::from(state.config.burst_size);
            if tokens_needed > capacity {
                warn!(
                    tokens_needed,
                    capacity, "token request exceeds burst capacity, clamping"
                );
            }
            tokens_needed.min(capacity).max(0.0)
        };

        if let Some(blocked_until) = state.blocked_until {
            let now = Instant::now();
            if now < blocked_until {
                debug!(
                    block_remaining_ms = (blocked_until - now).as_millis(),
                    "domain is blocked, waiting for block to lift"
                );
                tokio::time::sleep_until(blocked_until).await;
            }
            state.blocked_until = None;
        }

        state.refill(Instant::now());

        while state.tokens < tokens_needed {
            let deficit = tokens_needed - state.tokens;
            let wait = Duration::from_secs_f64(deficit / state.config.requests_per_second);
            debug!(
                deficit,
                wait_ms = wait.as_millis(),
                "reservoir short, waiting for refill"
            );
            tokio::time::sleep(wait).await;
            state.refill(Instant::now());
        }

        state.tokens -= tokens_needed;
        started.elapsed()
    }

    /// Forcibly blocks the bucket until the given deadline.
    ///
    /// The reservoir is zeroed so the block lifting does not release an
    /// immediate burst; tokens accumulate again from the moment of blocking.
    pub async fn block_until(&self, until: Instant) {
        let mut state = self.inner.lock().await;
        let now = Instant::now();
        state.blocked_until = Some(until);
        state.tokens = 0.0;
        state.last_refill = now;
    }

    /// Restores full capacity and clears any active block.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        state.tokens = f64::from(state.config.burst_size);
        state.last_refill = Instant::now();
        state.blocked_until = None;
    }

    /// Replaces the bucket configuration in place.
    ///
    /// Capacity and refill-rate changes take effect on the next refill; the
    /// current reservoir level is only clamped down if it now exceeds the new
    /// capacity.
    pub async fn set_config(&self, config: RateLimitConfig) {
        let mut state = self.inner.lock().await;
        state.config = config;
        state.tokens = state.tokens.min(f64::from(config.burst_size));
    }

    /// Current reservoir level, for diagnostics and tests.
    pub async fn tokens(&self) -> f64 {
        self.inner.lock().await.tokens
    }
}

/// Registry of per-domain token buckets.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. Buckets are
/// created lazily on first acquisition and live for the process lifetime.
/// Domain-specific [`RateLimitConfig`] overrides may be registered at any
/// time; registering an override for a domain whose bucket already exists
/// updates that bucket's config in place.
#[derive(Debug)]
pub struct RateLimiter {
    default_config: RateLimitConfig,
    overrides: DashMap<String, RateLimitConfig>,
    /// Per-domain buckets. Arc lets us clone the bucket out and release the
    /// `DashMap` shard lock before awaiting on the bucket mutex.
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiter {
    /// Creates a rate limiter with the given default per-domain config.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] if the default config fails
    /// validation.
    #[instrument(skip_all, fields(rps = default_config.requests_per_second, burst = default_config.burst_size))]
    pub fn new(default_config: RateLimitConfig) -> Result<Self, RateLimitError> {
        default_config.validate("default")?;
        debug!("creating rate limiter");
        Ok(Self {
            default_config,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        })
    }

    /// Returns the default per-domain config.
    #[must_use]
    pub fn default_config(&self) -> RateLimitConfig {
        self.default_config
    }

    /// Registers a domain-specific throughput limit.
    ///
    /// If the domain's bucket already exists its config is updated in place;
    /// the change takes effect on the bucket's next refill.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] if the config fails
    /// validation.
    pub async fn set_domain_limit(
        &self,
        domain: &str,
        config: RateLimitConfig,
    ) -> Result<(), RateLimitError> {
        let domain = domain.to_lowercase();
        config.validate(&domain)?;
        self.overrides.insert(domain.clone(), config);
        if let Some(bucket) = self.buckets.get(&domain).map(|b| Arc::clone(&b)) {
            bucket.set_config(config).await;
        }
        Ok(())
    }

    /// Registers several domain-specific limits at once.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure; limits registered before the
    /// failing entry remain in effect.
    pub async fn set_domain_limits<I>(&self, limits: I) -> Result<(), RateLimitError>
    where
        I: IntoIterator<Item = (String, RateLimitConfig)>,
    {
        for (domain, config) in limits {
            self.set_domain_limit(&domain, config).await?;
        }
        Ok(())
    }

    /// Acquires one token for the given URL or bare domain, suspending until
    /// the domain's bucket allows the request.
    ///
    /// Returns the time spent waiting.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] if the bucket cannot be
    /// created because its configuration is unusable.
    #[instrument(skip(self), fields(domain))]
    pub async fn acquire(&self, url_or_domain: &str) -> Result<Duration, RateLimitError> {
        self.acquire_tokens(url_or_domain, 1.0).await
    }

    /// Acquires `tokens` tokens for the given URL or bare domain.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] if the bucket cannot be
    /// created because its configuration is unusable.
    pub async fn acquire_tokens(
        &self,
        url_or_domain: &str,
        tokens: f64,
    ) -> Result<Duration, RateLimitError> {
        let domain = extract_domain(url_or_domain);
        tracing::Span::current().record("domain", &domain);

        let bucket = self.bucket_for(&domain)?;
        let waited = bucket.acquire(tokens).await;
        if !waited.is_zero() {
            debug!(
                domain = %domain,
                wait_ms = waited.as_millis(),
                "rate limit wait applied"
            );
        }
        Ok(waited)
    }

    /// Blocks a domain until the given deadline.
    ///
    /// A no-op when no bucket exists for the domain yet — there is nothing to
    /// block, and the bucket created on first use starts full anyway.
    #[instrument(skip(self, until))]
    pub async fn block_domain(&self, domain: &str, until: Instant) {
        let domain = domain.to_lowercase();
        let Some(bucket) = self.buckets.get(&domain).map(|b| Arc::clone(&b)) else {
            debug!(domain = %domain, "no bucket for domain, nothing to block");
            return;
        };
        warn!(
            domain = %domain,
            block_ms = until.saturating_duration_since(Instant::now()).as_millis(),
            "blocking domain on server backpressure"
        );
        bucket.block_until(until).await;
    }

    /// Restores a domain's bucket to full capacity, clearing any block.
    ///
    /// A no-op when no bucket exists for the domain.
    pub async fn reset_domain(&self, domain: &str) {
        let domain = domain.to_lowercase();
        if let Some(bucket) = self.buckets.get(&domain).map(|b| Arc::clone(&b)) {
            bucket.reset().await;
        }
    }

    /// Looks up or lazily creates the bucket for a domain.
    fn bucket_for(&self, domain: &str) -> Result<Arc<TokenBucket>, RateLimitError> {
        if let Some(bucket) = self.buckets.get(domain) {
            return Ok(Arc::clone(&bucket));
        }
        let config = self
            .overrides
            .get(domain)
            .map_or(self.default_config, |c| *c);
        config.validate(domain)?;
        // entry() re-checks under the shard lock so concurrent first
        // acquirers share one bucket.
        let bucket = self
            .buckets
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(config)))
            .clone();
        Ok(bucket)
    }
}

/// Extracts the rate-limiting domain key from a URL or bare domain.
///
/// When the input parses as an absolute URL the key is the lowercased host,
/// with an explicit non-default port appended as `host:port`. Inputs without
/// a scheme are treated as bare domains and lowercased as-is.
///
/// # Examples
///
/// ```
/// use skyfetch_core::download::extract_domain;
///
/// assert_eq!(extract_domain("https://Example.COM/path"), "example.com");
/// assert_eq!(extract_domain("https://example.com:8080/x"), "example.com:8080");
/// assert_eq!(extract_domain("tides.example.org"), "tides.example.org");
/// ```
#[must_use]
pub fn extract_domain(url_or_domain: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url_or_domain)
        && let Some(host) = parsed.host_str()
    {
        let host = host.to_lowercase();
        return match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
    }
    url_or_domain.trim().trim_end_matches('/').to_lowercase()
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both formats from RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2026 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at
/// 1 hour.
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    // Integer seconds first (most common)
    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    // HTTP-date
    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(
                header_value,
                "Retry-After date is in the past, returning zero"
            );
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
