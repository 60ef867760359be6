//! HTTP transport boundary
//!
//! Everything that talks to the remote services goes through [`Transport`], so the
//! orchestration logic can be driven by a scripted mock in tests.

use crate::error::BuildError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::error::Error as _;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout for remote calls
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn json(value: &Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Object storage answers 403 or 404 for keys that do not exist yet
    pub fn is_missing(&self) -> bool {
        self.status == 404 || self.status == 403
    }

    pub fn parse_json(&self) -> Result<Value, BuildError> {
        serde_json::from_str(&self.body)
            .map_err(|e| BuildError::InvalidResponse(format!("{} (body: {})", e, preview(&self.body))))
    }
}

/// Failure before any HTTP status was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout(String),
    /// Host name did not resolve (yet)
    Dns(String),
    Connect(String),
    Other(String),
}

impl TransportError {
    /// Worth retrying with the same request
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::Dns(_) | TransportError::Connect(_)
        )
    }

    pub fn message(&self) -> &str {
        match self {
            TransportError::Timeout(m)
            | TransportError::Dns(m)
            | TransportError::Connect(m)
            | TransportError::Other(m) => m,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(m) => write!(f, "request timed out: {}", m),
            TransportError::Dns(m) => write!(f, "DNS lookup failed: {}", m),
            TransportError::Connect(m) => write!(f, "connection failed: {}", m),
            TransportError::Other(m) => write!(f, "request failed: {}", m),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, TransportError>;

    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport with connection pooling
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }

    async fn finish(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(HttpResponse { status, body })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, TransportError> {
        debug!(url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify)?;
        Self::finish(response).await
    }

    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await.map_err(classify)?;
        Self::finish(response).await
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    let message = error.to_string();
    if error.is_timeout() {
        return TransportError::Timeout(message);
    }
    if is_dns_failure(&error) {
        return TransportError::Dns(message);
    }
    if error.is_connect() {
        return TransportError::Connect(message);
    }
    TransportError::Other(message)
}

// reqwest has no dedicated DNS flag; the resolver error shows up in the source chain.
fn is_dns_failure(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        let text = err.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = err.source();
    }
    false
}

/// Backoff schedule for transient transport failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Runs `request` until it produces an HTTP response, retrying only transient
/// transport failures. HTTP error statuses are returned as-is, never retried.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, what: &str, mut request: F) -> Result<HttpResponse, BuildError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HttpResponse, TransportError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match request().await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "{} failed, retrying",
                    what
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                return Err(BuildError::NetworkTransient {
                    attempts: attempt,
                    message: e.to_string(),
                })
            }
            Err(e) => return Err(BuildError::Request(format!("{}: {}", what, e))),
        }
    }
}

/// Turns a non-2xx response into [`BuildError::Http`].
pub fn ensure_success(url: &str, response: HttpResponse) -> Result<HttpResponse, BuildError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(BuildError::Http {
            status: response.status,
            url: url.to_string(),
            body: preview(&response.body),
        })
    }
}

fn preview(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "submit", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TransportError::Connect("refused".to_string()))
                } else {
                    Ok(HttpResponse::ok("{}"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_ceiling() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast_policy(), "submit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Timeout("slow".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, BuildError::NetworkTransient { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_http_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let response = with_retry(&fast_policy(), "submit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(HttpResponse::new(500, "boom")) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = ensure_success("http://x", response).unwrap_err();
        assert_eq!(err.code(), "HTTP_ERROR");
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast_policy(), "submit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Other("bad url".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.code(), "REQUEST_FAILED");
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_missing_statuses() {
        assert!(HttpResponse::new(404, "").is_missing());
        assert!(HttpResponse::new(403, "").is_missing());
        assert!(!HttpResponse::new(500, "").is_missing());
    }

    #[test]
    fn test_transient_classes() {
        assert!(TransportError::Dns("x".into()).is_transient());
        assert!(!TransportError::Other("x".into()).is_transient());
    }
}
