//! Transport seam for issuing HTTP requests.
//!
//! The [`Transport`] trait is the injectable boundary between the retry and
//! classification logic in [`crate::download::HttpClient`] and the actual
//! network. Production code uses [`ReqwestTransport`]; tests inject scripted
//! transports to exercise retry behavior deterministically without sockets.
//!
//! A transport returns `Ok` for *any* HTTP response, success or not — status
//! classification is the client's job, and headers such as `Retry-After`
//! must survive the trip back. `Err` is reserved for requests that never
//! produced a response: timeouts, connection failures, and a released pool.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::error::FetchError;

/// Connect timeout for new connections (seconds).
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A complete HTTP response as seen by the classification layer.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, keys lowercased.
    pub headers: HashMap<String, String>,
    /// Response body. Empty for HEAD requests.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Returns a header value by its lowercased name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The Content-Type header, if present.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Issues HTTP requests on behalf of the client.
///
/// Implementations must be safe to share across Tokio tasks; the client
/// holds one transport behind an `Arc` for its whole lifetime.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Performs a GET request and reads the full body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Timeout`], [`FetchError::Network`], or
    /// [`FetchError::ClientClosed`]; HTTP error statuses are `Ok`.
    async fn get(&self, url: &str) -> Result<TransportResponse, FetchError>;

    /// Performs a HEAD request.
    ///
    /// # Errors
    ///
    /// Same contract as [`Transport::get`].
    async fn head(&self, url: &str) -> Result<TransportResponse, FetchError>;

    /// Releases pooled resources. Idempotent; in-flight requests finish
    /// under their own timeouts.
    fn shutdown(&self);
}

/// Production transport over a pooled `reqwest::Client`.
///
/// The pool handle lives behind an `RwLock<Option<_>>` so [`shutdown`]
/// can drop it while clones held by in-flight requests drain naturally.
///
/// [`shutdown`]: Transport::shutdown
#[derive(Debug)]
pub struct ReqwestTransport {
    client: RwLock<Option<Client>>,
}

impl ReqwestTransport {
    /// Builds a transport with the given per-request timeout and User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the underlying client cannot be
    /// constructed (e.g. TLS backend initialization failure).
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .gzip(true)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::network("<client construction>", e))?;
        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    /// Clones the pool handle out of the lock, or reports the pool released.
    fn handle(&self) -> Result<Client, FetchError> {
        self.client
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(FetchError::ClientClosed)
    }

    async fn request(&self, method: Method, url: &str) -> Result<TransportResponse, FetchError> {
        let client = self.handle()?;
        let request = match method {
            Method::Get => client.get(url),
            Method::Head => client.head(url),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = collect_headers(&response);

        let body = match method {
            Method::Head => Vec::new(),
            Method::Get => response
                .bytes()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchError::timeout(url)
                    } else {
                        FetchError::network(url, e)
                    }
                })?
                .to_vec(),
        };

        debug!(status, bytes = body.len(), "transport response");
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Head,
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self))]
    async fn get(&self, url: &str) -> Result<TransportResponse, FetchError> {
        self.request(Method::Get, url).await
    }

    #[instrument(skip(self))]
    async fn head(&self, url: &str) -> Result<TransportResponse, FetchError> {
        self.request(Method::Head, url).await
    }

    fn shutdown(&self) {
        let released = self
            .client
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .is_some();
        if released {
            debug!("transport pool released");
        }
    }
}

/// Copies response headers into a plain map with lowercased keys.
///
/// Values that are not valid UTF-8 are skipped; none of the headers this
/// client inspects (Retry-After, Content-Type) legitimately contain them.
fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}
