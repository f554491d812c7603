//! The outcome record returned by every download.
//!
//! A [`DownloadResult`] is created at the start of a `download()` call,
//! filled in by that call alone, and handed to the caller by value — after
//! that nothing mutates it. Callers branch on [`DownloadResult::success`];
//! the client never surfaces a download failure any other way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single download, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    /// The URL that was fetched, after placeholder expansion.
    pub url: String,
    /// Whether the download completed successfully.
    pub success: bool,
    /// HTTP status of the last attempt, when a response was received.
    pub status_code: Option<u16>,
    /// Response body on success.
    pub content: Option<Vec<u8>>,
    /// Response headers of the last attempt, keys lowercased.
    pub headers: HashMap<String, String>,
    /// Human-readable failure description. `None` on success.
    pub error: Option<String>,
    /// Total wall-clock span of the `download()` call.
    pub download_time: Duration,
    /// Time spent waiting inside the rate limiter.
    pub wait_time: Duration,
    /// Number of retries performed after the initial attempt.
    pub retry_count: u32,
    /// Where the body was persisted, when saving was requested.
    pub file_path: Option<PathBuf>,
    /// Accounted body size in bytes (see the client's size accounting).
    pub size_bytes: Option<u64>,
    /// Content-Type of the response, when present.
    pub content_type: Option<String>,
    /// When the download started (UTC).
    pub timestamp: DateTime<Utc>,
    /// Rate-limiting and statistics key for the destination.
    pub domain: String,
}

impl DownloadResult {
    /// Creates a pending result for a download that is about to start.
    #[must_use]
    pub fn started(url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            status_code: None,
            content: None,
            headers: HashMap::new(),
            error: None,
            download_time: Duration::ZERO,
            wait_time: Duration::ZERO,
            retry_count: 0,
            file_path: None,
            size_bytes: None,
            content_type: None,
            timestamp: Utc::now(),
            domain: domain.into(),
        }
    }

    /// Marks the result failed with the given description.
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }
}
