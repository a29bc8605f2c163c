//! HTTP client for upstream calls with rate limiting and retry classification
//!
//! Every request goes through the governor limiter and the retry loop of
//! [`RetryPolicy`]. Callers only ever see a parsed JSON body or a
//! classified [`FetchError`].

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT},
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::errors::FetchError;
use crate::infrastructure::config::HttpConfig;
use crate::infrastructure::retry_policy::{RetryPolicy, StatusClass, classify_status};

/// Longest response body excerpt kept in a bad-request error
const BODY_EXCERPT_CHARS: usize = 300;

/// HTTP client configuration for one class of upstream calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
    pub origin: String,
    pub connect_timeout_seconds: u64,
    pub timeout_seconds: u64,
    /// 0 disables rate limiting
    pub max_requests_per_second: u32,
    pub retry: RetryPolicy,
}

impl HttpClientConfig {
    /// Settings for listing page requests
    #[must_use]
    pub fn listing(http: &HttpConfig) -> Self {
        Self::from_http(http, http.listing_timeout_seconds, http.listing_retry.clone())
    }

    /// Settings for per-listing detail requests
    #[must_use]
    pub fn detail(http: &HttpConfig) -> Self {
        Self::from_http(http, http.detail_timeout_seconds, http.detail_retry.clone())
    }

    fn from_http(http: &HttpConfig, timeout_seconds: u64, retry: RetryPolicy) -> Self {
        Self {
            user_agent: http.user_agent.clone(),
            accept_language: http.accept_language.clone(),
            referer: http.referer.clone(),
            origin: http.origin.clone(),
            connect_timeout_seconds: http.connect_timeout_seconds,
            timeout_seconds,
            max_requests_per_second: http.max_requests_per_second,
            retry,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::detail(&HttpConfig::default())
    }
}

/// Rate limited JSON client with classified retries
pub struct HttpClient {
    client: Client,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid accept language")?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&config.referer).context("Invalid referer")?,
        );
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&config.origin).context("Invalid origin")?,
        );

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .gzip(true)
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        let rate_limiter = NonZeroU32::new(config.max_requests_per_second)
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// GET `url` with `query` and decode the JSON body.
    ///
    /// 404/410 and 400 return immediately. 403, 429, 5xx, other statuses,
    /// network errors and undecodable bodies are retried until the attempt
    /// ceiling, then reported as [`FetchError::Exhausted`].
    pub async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let policy = &self.config.retry;
        let attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            debug!("GET {} (attempt {}/{})", url, attempt, attempts);

            let (class, message) = match self.client.get(url).query(query).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match classify_status(status) {
                        StatusClass::Success => match response.json::<Value>().await {
                            Ok(body) => return Ok(body),
                            Err(e) => (StatusClass::Retryable, format!("invalid JSON body: {e}")),
                        },
                        StatusClass::NotFound => {
                            return Err(FetchError::NotFound {
                                status,
                                url: url.to_string(),
                            });
                        }
                        StatusClass::BadRequest => {
                            let body = response.text().await.unwrap_or_default();
                            return Err(FetchError::BadRequest {
                                url: url.to_string(),
                                body: body.chars().take(BODY_EXCERPT_CHARS).collect(),
                            });
                        }
                        class => (class, format!("HTTP {status}")),
                    }
                }
                Err(e) => (StatusClass::Retryable, format!("network error: {e}")),
            };

            last_error = message;
            if !policy.should_retry(attempt) {
                break;
            }

            let delay = policy.backoff(class, attempt);
            warn!(
                "⚠️ {} for {}, retrying in {:?} (attempt {}/{})",
                last_error, url, delay, attempt, attempts
            );
            tokio::time::sleep(delay).await;
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }
}
