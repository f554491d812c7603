//! Per-domain acquisition statistics.
//!
//! One [`DownloadStatistics`] instance lives for the lifetime of its owning
//! client. Counters are increment-only atomics so concurrent downloads can
//! record outcomes without a shared lock; wait-time samples take a short
//! per-domain mutex. Statistics are never reset — callers construct a new
//! client when they want a fresh slate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

/// Waits shorter than this are noise (scheduler latency, not rate limiting)
/// and are not sampled.
const NONTRIVIAL_WAIT: Duration = Duration::from_millis(10);

/// Statistics registry shared by every concurrent download of one client.
#[derive(Debug, Default)]
pub struct DownloadStatistics {
    domains: DashMap<String, DomainStats>,
    total_downloads: AtomicU64,
    total_errors: AtomicU64,
}

#[derive(Debug, Default)]
struct DomainStats {
    successful: AtomicU64,
    errors: AtomicU64,
    /// Rate-limiter wait samples above the triviality threshold.
    wait_times: Mutex<Vec<Duration>>,
}

/// Point-in-time aggregate of a client's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Total successful downloads across all domains.
    pub total_downloads: u64,
    /// Total failed downloads across all domains.
    pub total_errors: u64,
    /// `total_downloads / (total_downloads + total_errors)`, 0.0 when idle.
    pub success_rate: f64,
    /// Per-domain breakdown, keyed by domain.
    pub per_domain: std::collections::HashMap<String, DomainSnapshot>,
}

/// Per-domain slice of a [`StatsSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct DomainSnapshot {
    /// Successful downloads for this domain.
    pub successful: u64,
    /// Failed downloads for this domain.
    pub errors: u64,
    /// `successful / (successful + errors)`, 0.0 when idle.
    pub success_rate: f64,
    /// Mean sampled rate-limit wait, in seconds.
    pub avg_wait_time: f64,
    /// Largest sampled rate-limit wait, in seconds.
    pub max_wait_time: f64,
    /// Sum of sampled rate-limit waits, in seconds.
    pub total_wait_time: f64,
}

impl DownloadStatistics {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful download for a domain.
    pub fn record_success(&self, domain: &str) {
        self.domain_entry(domain)
            .successful
            .fetch_add(1, Ordering::SeqCst);
        self.total_downloads.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a failed download for a domain.
    pub fn record_error(&self, domain: &str) {
        self.domain_entry(domain)
            .errors
            .fetch_add(1, Ordering::SeqCst);
        self.total_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a rate-limiter wait for a domain.
    ///
    /// Trivial waits are dropped so averages reflect actual throttling.
    pub fn record_wait(&self, domain: &str, wait: Duration) {
        if wait < NONTRIVIAL_WAIT {
            return;
        }
        let entry = self.domain_entry(domain);
        let mut samples = entry
            .wait_times
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        samples.push(wait);
    }

    /// Produces a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let total_downloads = self.total_downloads.load(Ordering::SeqCst);
        let total_errors = self.total_errors.load(Ordering::SeqCst);

        let per_domain = self
            .domains
            .iter()
            .map(|entry| {
                let successful = entry.successful.load(Ordering::SeqCst);
                let errors = entry.errors.load(Ordering::SeqCst);
                let waits: Vec<Duration> = entry
                    .wait_times
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone();

                let total_wait: f64 = waits.iter().map(Duration::as_secs_f64).sum();
                let max_wait = waits
                    .iter()
                    .map(Duration::as_secs_f64)
                    .fold(0.0_f64, f64::max);
                let avg_wait = if waits.is_empty() {
                    0.0
                } else {
                    total_wait / waits.len() as f64
                };

                (
                    entry.key().clone(),
                    DomainSnapshot {
                        successful,
                        errors,
                        success_rate: rate(successful, errors),
                        avg_wait_time: avg_wait,
                        max_wait_time: max_wait,
                        total_wait_time: total_wait,
                    },
                )
            })
            .collect();

        StatsSnapshot {
            total_downloads,
            total_errors,
            success_rate: rate(total_downloads, total_errors),
            per_domain,
        }
    }

    fn domain_entry(&self, domain: &str) -> dashmap::mapref::one::RefMut<'_, String, DomainStats> {
        self.domains.entry(domain.to_string()).or_default()
    }
}

fn rate(successes: u64, errors: u64) -> f64 {
    let total = successes + errors;
    if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64
    }
}
