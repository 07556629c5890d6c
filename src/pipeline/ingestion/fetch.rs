use super::rate_limiter::HostRateLimiter;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::metrics::FetchMetrics;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and timeout policy applied uniformly to every source request.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Total attempts, including the first
    pub retries: u32,
    /// Per-attempt timeout, body included
    pub timeout: Duration,
    /// Delay before the second attempt; doubles for each further attempt
    pub initial_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            retries: config.retries.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            initial_backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

impl FetchPolicy {
    fn backoff_for(&self, failed_attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(failed_attempt.saturating_sub(1))
    }
}

/// Shared, rate-limited HTTP client used by every source adapter.
pub struct Fetcher {
    client: Client,
    limiter: Arc<HostRateLimiter>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(
        policy: FetchPolicy,
        limiter: Arc<HostRateLimiter>,
        user_agent: &str,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).gzip(true).build()?;
        Ok(Self { client, limiter, policy })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let limiter = Arc::new(HostRateLimiter::new(Duration::from_millis(
            config.min_host_interval_ms,
        )));
        Self::new(FetchPolicy::from(config), limiter, &config.user_agent)
    }

    /// Send one request with the retry policy applied. Non-success statuses
    /// become errors; the response body is left unread.
    pub async fn fetch_with_retry(&self, method: Method, url: &str) -> Result<Response, FetchError> {
        self.with_retry(url, |parsed| self.send(method.clone(), parsed)).await
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.with_retry(url, |parsed| async move {
            let resp = self.send(Method::GET, parsed.clone()).await?;
            resp.text().await.map_err(|e| classify(&parsed, e))
        })
        .await
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.with_retry(url, |parsed| async move {
            let resp = self.send(Method::GET, parsed.clone()).await?;
            let bytes = resp.bytes().await.map_err(|e| classify(&parsed, e))?;
            Ok(bytes.to_vec())
        })
        .await
    }

    /// Size of a remote resource in KB, from a HEAD request's Content-Length.
    pub async fn head_size_kb(&self, url: &str) -> Result<Option<u32>, FetchError> {
        let resp = self.fetch_with_retry(Method::HEAD, url).await?;
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|bytes| (bytes / 1024).min(u32::MAX as u64) as u32);
        Ok(size)
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, op: F) -> Result<T, FetchError>
    where
        F: Fn(Url) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let mut attempt = 1;
        loop {
            match op(parsed.clone()).await {
                Ok(value) => {
                    FetchMetrics::request_success();
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.retries => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(url, attempt, error = %e, delay_ms = delay.as_millis() as u64, "fetch failed, retrying");
                    FetchMetrics::retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    FetchMetrics::request_error();
                    return Err(e);
                }
            }
        }
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response, FetchError> {
        let host = url.host_str().unwrap_or_default().to_string();
        self.limiter.acquire(&host).await;
        debug!(%method, url = %url, "sending request");

        let resp = self
            .client
            .request(method, url.clone())
            .timeout(self.policy.timeout)
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchError::NotFound { url: url.to_string() }),
            s => Err(FetchError::Status { url: url.to_string(), status: s.as_u16() }),
        }
    }
}

fn classify(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Network { url: url.to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = FetchPolicy {
            retries: 4,
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_policy_from_default_config() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_retryable_classification() {
        let url = "https://example.com/x".to_string();
        assert!(FetchError::Timeout { url: url.clone() }.is_retryable());
        assert!(FetchError::Status { url: url.clone(), status: 503 }.is_retryable());
        assert!(FetchError::Status { url: url.clone(), status: 429 }.is_retryable());
        assert!(!FetchError::Status { url: url.clone(), status: 403 }.is_retryable());
        assert!(!FetchError::NotFound { url }.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_sent() {
        let fetcher = Fetcher::from_config(&FetchConfig::default()).unwrap();
        let err = fetcher.get_text("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
