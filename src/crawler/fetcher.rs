//! HTTP fetch client
//!
//! This module issues single backend requests and owns the retry loop:
//! - Building the HTTP client with the configured user agent
//! - Per-call timeouts on every request
//! - Classifying failures as retryable or permanent
//! - Exponential backoff between attempts (non-blocking sleep)

use crate::config::{ApiConfig, CrawlerConfig};
use crate::crawler::retry::{RetryDecision, RetryPolicy};
use crate::state::{ErrorCategory, FetchFailure};
use crate::tenant::RequestDescriptor;
use crate::ComplotError;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

/// Raw content returned by a successful fetch
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: String,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Final failure of a fetch after the retry policy gave up
#[derive(Debug, Clone)]
pub struct FailedFetch {
    pub failure: FetchFailure,
    pub attempts: u32,
}

/// Builds an HTTP client with proper configuration
///
/// The per-call timeout is applied on each request rather than on the client,
/// so that callers sharing a client may use different limits.
pub fn build_http_client(api: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(api.user_agent.clone())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Maps a non-success status to a failure; `None` means the status is OK
///
/// | Status | Category | Retried |
/// |--------|----------|---------|
/// | 429, 503 | Throttled | yes |
/// | other 5xx | ServerError | yes |
/// | 404, 410 | NotFound | no |
/// | 401, 403 | AccessDenied | no |
/// | other 4xx | BadRequest | no |
pub fn classify_status(status: StatusCode) -> Option<FetchFailure> {
    if status.is_success() {
        return None;
    }

    let code = status.as_u16();
    let category = match code {
        429 | 503 => ErrorCategory::Throttled,
        500..=599 => ErrorCategory::ServerError,
        404 | 410 => ErrorCategory::NotFound,
        401 | 403 => ErrorCategory::AccessDenied,
        _ => ErrorCategory::BadRequest,
    };
    Some(FetchFailure::new(category, format!("HTTP {}", code)))
}

/// Maps a transport-level error to a failure
fn classify_transport(error: &reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::new(ErrorCategory::Timeout, "request timed out")
    } else if error.is_connect() {
        FetchFailure::new(ErrorCategory::Connection, error.to_string())
    } else if error.is_builder() {
        FetchFailure::new(ErrorCategory::BadRequest, error.to_string())
    } else {
        // reset mid-body, protocol errors and the like
        FetchFailure::new(ErrorCategory::Connection, error.to_string())
    }
}

/// Fetch client with retry and backoff
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl FetchClient {
    pub fn new(api: &ApiConfig, crawler: &CrawlerConfig) -> Result<Self, ComplotError> {
        let client = build_http_client(api)?;
        Ok(Self::from_parts(
            client,
            crawler.retry_policy(),
            crawler.request_timeout(),
        ))
    }

    pub fn from_parts(client: Client, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches a request, retrying transient failures per the policy
    ///
    /// Exhausted retries return the last transient failure rather than an
    /// error; the caller records it as a failed work item.
    pub async fn fetch(&self, request: &RequestDescriptor) -> Result<FetchResponse, FailedFetch> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(request).await {
                Ok(body) => {
                    return Ok(FetchResponse {
                        body,
                        attempts: attempt,
                    })
                }
                Err(failure) => match self.policy.decide(attempt, failure.category) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::debug!(
                            url = %request.url,
                            attempt,
                            category = %failure.category,
                            "Retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::NoRetry => {
                        return Err(FailedFetch {
                            failure,
                            attempts: attempt,
                        })
                    }
                },
            }
        }
    }

    /// One network call with no retry
    async fn attempt(&self, request: &RequestDescriptor) -> Result<String, FetchFailure> {
        let response = self
            .client
            .get(request.url.clone())
            .header(header::REFERER, &request.referer)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if let Some(failure) = classify_status(response.status()) {
            return Err(failure);
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchFailure::new(ErrorCategory::Timeout, "body read timed out")
            } else {
                FetchFailure::new(ErrorCategory::GarbledResponse, e.to_string())
            }
        })?;

        if body.trim().is_empty() {
            return Err(FetchFailure::new(
                ErrorCategory::GarbledResponse,
                "empty response body",
            ));
        }

        Ok(body)
    }

    /// Checks that the backend answers at all
    ///
    /// Any HTTP response, whatever its status, counts as reachable. Only
    /// transport failures that survive the retry policy are reported.
    pub async fn check_reachable(&self, url: &str) -> Result<(), ComplotError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let failure = match self.client.get(url).timeout(self.timeout).send().await {
                Ok(_) => return Ok(()),
                Err(e) => classify_transport(&e),
            };

            match self.policy.decide(attempt, failure.category) {
                RetryDecision::RetryAfter(delay) => tokio::time::sleep(delay).await,
                RetryDecision::NoRetry => {
                    return Err(ComplotError::BackendUnreachable {
                        url: url.to_string(),
                        detail: failure.to_string(),
                    })
                }
            }
        }
    }
}
