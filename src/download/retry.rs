//! Failure classification and backoff policy for acquisition attempts.
//!
//! When an attempt fails, the error is classified into a [`FailureKind`]:
//! - [`FailureKind::Transient`] - timeouts, transport errors, 5xx; retried
//!   with exponential backoff
//! - [`FailureKind::RateLimited`] - HTTP 429; retried with the
//!   server-directed delay
//! - [`FailureKind::Permanent`] - validation rejections and other 4xx; never
//!   retried
//!
//! The [`RetryPolicy`] then decides whether to retry given the failure kind
//! and attempt count, calculating exponential backoff delays with jitter.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FetchError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum backoff delay (30 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of acquisition failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection refused.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, validation rejection, invalid URL.
    Permanent,

    /// Server rate limiting (HTTP 429). Retried with the server-directed
    /// delay when one is given.
    RateLimited,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so the first retry
        /// is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
///
/// With defaults, backoff delays are approximately 1s, 2s, 4s before the
/// attempt budget runs out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum backoff delay.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS + 1,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (minimum 1)
    /// * `base_delay` - Base delay for the first retry
    /// * `max_delay` - Maximum backoff delay
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy allowing `retry_attempts` retries after the initial
    /// attempt, using defaults for the delay settings.
    #[must_use]
    pub fn with_retry_attempts(retry_attempts: u32) -> Self {
        Self {
            max_attempts: retry_attempts.saturating_add(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_kind` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_kind: FailureKind, attempt: u32) -> RetryDecision {
        if failure_kind == FailureKind::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the backoff delay for a retry, with jitter.
    ///
    /// Formula: `min(base_delay * multiplier^(attempt - 1), max_delay) + jitter`
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 maps to exponent 0 (1x base)
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capped = Duration::from_millis(capped_ms as u64);
        capped + jitter()
    }
}

/// Random jitter between 0 and [`MAX_JITTER`].
///
/// Jitter prevents a thundering herd when several downloads fail at the same
/// moment and would otherwise retry in lockstep.
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Classifies an acquisition error into a failure kind for retry decisions.
///
/// | Error | Kind | Rationale |
/// |-------|------|-----------|
/// | Validation | Permanent | resubmitting the same URL cannot pass |
/// | RateLimit (config) | Permanent | configuration fault |
/// | Timeout | Transient | network may recover |
/// | Network | Transient | server may come back |
/// | HTTP 429 | RateLimited | server backpressure |
/// | HTTP 408/5xx | Transient | server-side, temporary |
/// | other HTTP 4xx | Permanent | request itself is wrong |
/// | Io | Permanent | local file system issue |
/// | ClientClosed | Permanent | pool released on purpose |
#[instrument]
pub fn classify_error(error: &FetchError) -> FailureKind {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Timeout { .. } | FetchError::Network { .. } => FailureKind::Transient,
        FetchError::Validation(_)
        | FetchError::RateLimit(_)
        | FetchError::Io { .. }
        | FetchError::ClientClosed => FailureKind::Permanent,
    }
}

/// Classifies an HTTP status code into a failure kind.
#[must_use]
pub fn classify_http_status(status: u16) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited,
        408 => FailureKind::Transient, // Request Timeout
        status if (500..600).contains(&status) => FailureKind::Transient,
        // Everything else that reaches classification is a failure the
        // server will keep giving us: other 4xx, unexpected 1xx/3xx.
        _ => FailureKind::Permanent,
    }
}
