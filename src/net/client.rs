//! Rate-limited HTTP client.
//!
//! All outbound traffic for a source goes through one [`SourceClient`]: it
//! acquires a token from the shared bucket, applies the per-request timeout,
//! retries transient failures with backoff, and honors cooperative
//! cancellation at every suspension point.

use std::sync::Arc;
use std::time::Duration;

use reqwest::RequestBuilder;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::net::rate_limit::RateLimiter;
use crate::net::retry::{is_retryable_status, retry_after_seconds, RetryPolicy};

/// A fully-read response body with provenance helpers.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    pub status: reqwest::StatusCode,
    pub bytes: Vec<u8>,
}

impl ResponseBody {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.bytes).map_err(|e| NetError::Permanent {
            message: format!("malformed response body: {e}"),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// SHA-256 of the raw body, hex-encoded, for `source_response_hash`.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }
}

/// HTTP client for one source API.
#[derive(Clone)]
pub struct SourceClient {
    source_api: String,
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl SourceClient {
    pub fn new(
        source_api: impl Into<String>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("prospector/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            source_api: source_api.into(),
            http,
            limiter,
            policy,
            timeout,
        }
    }

    pub fn source_api(&self) -> &str {
        &self.source_api
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.http.patch(url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder {
        self.http.head(url)
    }

    /// Execute a request with rate limiting and retry. The builder is cloned
    /// per attempt, so streaming bodies are not supported (none are needed).
    pub async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody, NetError> {
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire(cancel).await?;

            let this_try = request.try_clone().ok_or_else(|| NetError::Permanent {
                message: "request body is not cloneable for retry".to_string(),
            })?;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                result = this_try.send() => result,
            };

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();

                    if status.is_success() {
                        let bytes = tokio::select! {
                            _ = cancel.cancelled() => return Err(NetError::Cancelled),
                            bytes = response.bytes() => bytes.map_err(|e| NetError::Permanent {
                                message: format!("failed reading response body: {e}"),
                            })?,
                        };
                        return Ok(ResponseBody {
                            status,
                            bytes: bytes.to_vec(),
                        });
                    }

                    if !is_retryable_status(status) {
                        let body = response.text().await.unwrap_or_default();
                        return Err(NetError::Permanent {
                            message: format!(
                                "{} returned {}: {}",
                                self.source_api,
                                status,
                                truncate(&body, 200)
                            ),
                        });
                    }

                    if attempt >= self.policy.max_retries {
                        return Err(NetError::Transient {
                            attempts: attempt + 1,
                            message: format!("{} returned {}", self.source_api, status),
                        });
                    }

                    // Retry-After on 429 overrides computed backoff.
                    let wait = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        retry_after_seconds(&headers)
                            .unwrap_or_else(|| self.policy.wait_for_attempt(attempt))
                    } else {
                        self.policy.wait_for_attempt(attempt)
                    };

                    warn!(
                        source = %self.source_api,
                        status = %status,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retryable response, backing off"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(NetError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    attempt += 1;
                }
                Err(err) if err.is_timeout() => {
                    if attempt >= self.policy.max_retries {
                        return Err(NetError::Timeout {
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    let wait = self.policy.wait_for_attempt(attempt);
                    debug!(source = %self.source_api, attempt, "timeout, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(NetError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    // Connect/request errors are transient; retry them.
                    if attempt >= self.policy.max_retries {
                        return Err(NetError::Transient {
                            attempts: attempt + 1,
                            message: format!("{}: {err}", self.source_api),
                        });
                    }
                    let wait = self.policy.wait_for_attempt(attempt);
                    warn!(source = %self.source_api, error = %err, attempt, "network error, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(NetError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// GET a URL and decode JSON.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<T, NetError> {
        self.send(self.get(url), cancel).await?.json()
    }

    /// One unretried HEAD request, for health pings.
    pub async fn ping(&self, url: &str, cancel: &CancellationToken) -> Result<(), NetError> {
        self.limiter.acquire(cancel).await?;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            result = self.head(url).send() => result,
        };
        match outcome {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                Ok(())
            }
            Ok(response) => Err(NetError::Permanent {
                message: format!("{} ping returned {}", self.source_api, response.status()),
            }),
            Err(err) => Err(NetError::Transient {
                attempts: 1,
                message: format!("{} ping failed: {err}", self.source_api),
            }),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
