//! Integration tests for the acquisition client against a mock HTTP server.
//!
//! These tests exercise the full path — validation, rate limiting, the real
//! reqwest transport, retry, persistence, statistics — with wiremock
//! standing in for upstream data servers. Deterministic retry/classification
//! coverage without sockets lives in the unit tests next to the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use skyfetch_core::download::{ClientConfig, HttpClient, RateLimitConfig, RateLimiter};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Opt-in tracing for debugging test failures: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A generous rate limit so tests only wait where waiting is the point.
fn fast_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimitConfig::new(1_000.0, 1_000)).unwrap())
}

fn test_client(output_dir: &TempDir, retry_attempts: u32) -> HttpClient {
    init_tracing();
    HttpClient::with_rate_limiter(
        ClientConfig {
            timeout: Duration::from_secs(5),
            retry_attempts,
            output_dir: output_dir.path().to_path_buf(),
            ..ClientConfig::default()
        },
        fast_limiter(),
    )
    .unwrap()
}

/// Responds 500 for the first `failures` requests, then 200.
struct FlakyResponder {
    failures: usize,
    seen: AtomicUsize,
}

impl FlakyResponder {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            seen: AtomicUsize::new(0),
        }
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_bytes(b"recovered".as_slice())
        }
    }
}

// ==================== Success Paths ====================

#[tokio::test]
async fn test_download_success_saves_under_domain_directory() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/latest/obs.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/csv")
                .set_body_bytes(b"time,wind\n06Z,8kt\n".as_slice()),
        )
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let url = format!("{}/latest/obs.csv", mock_server.uri());
    let result = client.download(&url, true, None).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.content.as_deref(), Some(b"time,wind\n06Z,8kt\n".as_slice()));
    assert_eq!(result.content_type.as_deref(), Some("text/csv"));
    assert_eq!(result.size_bytes, Some(18));

    // Saved under <output>/<host:port>/obs.csv (wiremock binds an ephemeral
    // port, which is part of the sanitized domain directory)
    let file_path = result.file_path.clone().unwrap();
    assert!(file_path.starts_with(output.path()), "{}", file_path.display());
    assert!(file_path.ends_with("obs.csv"), "{}", file_path.display());
    assert_eq!(std::fs::read(&file_path).unwrap(), b"time,wind\n06Z,8kt\n");
}

#[tokio::test]
async fn test_download_without_save_keeps_content_only() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/table.html"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<table/>".as_slice()))
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let url = format!("{}/table.html", mock_server.uri());
    let result = client.download(&url, false, None).await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.content.is_some());
    assert!(result.file_path.is_none());

    // Nothing was written
    assert!(
        std::fs::read_dir(output.path()).unwrap().next().is_none(),
        "no files expected with save_to_disk=false"
    );
}

#[tokio::test]
async fn test_query_urls_get_distinct_filenames() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/obs.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/json")
                .set_body_bytes(b"{\"ok\":true}".as_slice()),
        )
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let result_a = client
        .download(&format!("{}/obs.json?station=44013", mock_server.uri()), true, None)
        .await;
    let result_b = client
        .download(&format!("{}/obs.json?station=46042", mock_server.uri()), true, None)
        .await;

    assert!(result_a.success && result_b.success);
    assert_ne!(
        result_a.file_path, result_b.file_path,
        "distinct queries must not share a save path"
    );
}

#[tokio::test]
async fn test_json_size_accounting_is_compacted() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    let pretty = b"{\n    \"wind\": 12,\n    \"gust\": 18\n}";
    Mock::given(method("GET"))
        .and(path("/obs.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/json")
                .set_body_bytes(pretty.as_slice()),
        )
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let result = client
        .download(&format!("{}/obs.json", mock_server.uri()), false, None)
        .await;

    assert!(result.success);
    // Compact form: {"wind":12,"gust":18}
    assert_eq!(result.size_bytes, Some(21));
    // The stored content is the raw body, untouched
    assert_eq!(result.content.as_deref(), Some(pretty.as_slice()));
}

// ==================== Failure Classification ====================

#[tokio::test]
async fn test_404_fails_without_retry() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/gone.csv"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 3);
    let result = client
        .download(&format!("{}/gone.csv", mock_server.uri()), false, None)
        .await;

    assert!(!result.success);
    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.retry_count, 0);
    assert!(result.error.as_deref().unwrap().contains("404"));
}

#[tokio::test]
async fn test_500_then_success_retries() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/flaky.json"))
        .respond_with(FlakyResponder::new(1))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 2);
    let result = client
        .download(&format!("{}/flaky.json", mock_server.uri()), false, None)
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.content.as_deref(), Some(b"recovered".as_slice()));
}

#[tokio::test]
async fn test_persistent_500_exhausts_budget() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/down.json"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 1);
    let result = client
        .download(&format!("{}/down.json", mock_server.uri()), false, None)
        .await;

    assert!(!result.success);
    assert_eq!(result.retry_count, 1);
    assert!(result.error.as_deref().unwrap().contains("503"));
}

// ==================== 429 Backpressure ====================

#[tokio::test]
async fn test_429_retry_after_then_success() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    struct RateLimitedOnce {
        seen: AtomicUsize,
    }
    impl Respond for RateLimitedOnce {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("Retry-After", "1")
            } else {
                ResponseTemplate::new(200).set_body_bytes(b"after the wait".as_slice())
            }
        }
    }

    Mock::given(method("GET"))
        .and(path("/busy.json"))
        .respond_with(RateLimitedOnce {
            seen: AtomicUsize::new(0),
        })
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 1);
    let started = Instant::now();
    let result = client
        .download(&format!("{}/busy.json", mock_server.uri()), false, None)
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.retry_count, 1);
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "must sleep out the Retry-After delay, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_429_exhausted_blocks_domain_for_next_download() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/busy.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/other.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".as_slice()))
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let result = client
        .download(&format!("{}/busy.json", mock_server.uri()), false, None)
        .await;
    assert!(!result.success);
    assert!(
        result.error.as_deref().unwrap().contains("Rate limited"),
        "error: {:?}",
        result.error
    );

    // The whole domain is now blocked; an unrelated URL on the same host
    // waits out the server's deadline inside the rate limiter
    let started = Instant::now();
    let result = client
        .download(&format!("{}/other.json", mock_server.uri()), false, None)
        .await;
    assert!(result.success, "error: {:?}", result.error);
    assert!(
        result.wait_time >= Duration::from_millis(800),
        "expected the domain block to show up as wait time, got {:?} (elapsed {:?})",
        result.wait_time,
        started.elapsed()
    );
}

// ==================== Validation ====================

#[tokio::test]
async fn test_private_targets_rejected_before_any_request() {
    let output = TempDir::new().unwrap();
    let client = test_client(&output, 3);

    for url in [
        "http://127.0.0.1/admin",
        "http://169.254.169.254/latest/meta-data/",
        "http://10.0.0.8/internal",
        "http://localhost:8080/debug",
        "ftp://tides.example.org/table",
    ] {
        let result = client.download(url, false, None).await;
        assert!(!result.success, "must reject {url}");
        assert!(result.error.is_some(), "must explain rejection of {url}");
        assert_eq!(result.retry_count, 0, "no retries for {url}");
        assert!(result.status_code.is_none(), "no response for {url}");
    }

    let snapshot = client.statistics();
    assert_eq!(snapshot.total_errors, 5);
    assert_eq!(snapshot.total_downloads, 0);
}

// ==================== head ====================

#[tokio::test]
async fn test_head_returns_status_and_headers_without_body() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("HEAD"))
        .and(path("/obs.json"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Type", "application/json"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let (status, headers) = client
        .head(&format!("{}/obs.json", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(status, 200);
    assert_eq!(
        headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
}

// ==================== download_multiple ====================

#[tokio::test]
async fn test_download_multiple_returns_result_per_url() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/a.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".as_slice()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let urls = vec![
        format!("{}/a.json", mock_server.uri()),
        format!("{}/b.json", mock_server.uri()),
        "http://192.168.1.1/c.json".to_string(),
    ];

    let results = client.download_multiple(&urls, false, Some(2)).await;

    assert_eq!(results.len(), 3);
    assert!(results[&urls[0]].success);
    assert!(!results[&urls[1]].success);
    assert_eq!(results[&urls[1]].status_code, Some(404));
    assert!(!results[&urls[2]].success);
    assert!(
        results[&urls[2]]
            .error
            .as_deref()
            .unwrap()
            .contains("private"),
        "error: {:?}",
        results[&urls[2]].error
    );
}

// ==================== Statistics ====================

#[tokio::test]
async fn test_statistics_accumulate_across_downloads() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/ok.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".as_slice()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad.json"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    for _ in 0..3 {
        client
            .download(&format!("{}/ok.json", mock_server.uri()), false, None)
            .await;
    }
    for _ in 0..2 {
        client
            .download(&format!("{}/bad.json", mock_server.uri()), false, None)
            .await;
    }

    let snapshot = client.statistics();
    assert_eq!(snapshot.total_downloads, 3);
    assert_eq!(snapshot.total_errors, 2);
    assert!((snapshot.success_rate - 0.6).abs() < 1e-9);
    assert_eq!(snapshot.per_domain.len(), 1);

    let (_, domain) = snapshot.per_domain.iter().next().unwrap();
    assert_eq!(domain.successful, 3);
    assert_eq!(domain.errors, 2);
    assert!((domain.success_rate - 0.6).abs() < 1e-9);
}

// ==================== close ====================

#[tokio::test]
async fn test_close_releases_pool_and_new_downloads_fail_closed() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/ok.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".as_slice()))
        .mount(&mock_server)
        .await;

    let client = test_client(&output, 0);
    let url = format!("{}/ok.json", mock_server.uri());
    assert!(client.download(&url, false, None).await.success);

    client.close();
    client.close();

    let result = client.download(&url, false, None).await;
    assert!(!result.success);
    assert!(
        result.error.as_deref().unwrap().contains("client closed"),
        "error: {:?}",
        result.error
    );
}
