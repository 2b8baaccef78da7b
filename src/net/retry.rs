//! Retry policy for outbound HTTP.
//!
//! Retryable: network errors, HTTP 429, HTTP 5xx. Everything else fails
//! permanently. Backoff is exponential with jitter; a `Retry-After` header
//! on a 429 overrides the computed wait.

use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

use crate::config::HttpConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_max: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            backoff_max: 30.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(http: &HttpConfig) -> Self {
        Self {
            max_retries: http.retries,
            backoff_base: http.backoff_base,
            backoff_max: http.backoff_max,
            jitter: true,
        }
    }

    /// Wait before retry number `attempt` (0-indexed): `base^attempt` seconds
    /// capped at `backoff_max`, with ±25% jitter.
    pub fn wait_for_attempt(&self, attempt: u32) -> Duration {
        let wait = self
            .backoff_base
            .powi(attempt as i32)
            .min(self.backoff_max);
        let wait = if self.jitter {
            let factor = 0.75 + rand::thread_rng().gen_range(0.0..0.5);
            wait * factor
        } else {
            wait
        };
        Duration::from_secs_f64(wait.max(0.0))
    }
}

/// Is this HTTP status worth retrying?
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parse a `Retry-After` header value (seconds form only).
pub fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth_with_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base: 2.0,
            backoff_max: 5.0,
            jitter: false,
        };
        assert_eq!(policy.wait_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.wait_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.wait_for_attempt(2), Duration::from_secs(4));
        // Capped.
        assert_eq!(policy.wait_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: 2.0,
            backoff_max: 30.0,
            jitter: true,
        };
        for _ in 0..50 {
            let wait = policy.wait_for_attempt(2).as_secs_f64();
            assert!((3.0..=5.0).contains(&wait), "wait {wait} out of range");
        }
    }

    #[test]
    fn status_classification() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers), Some(Duration::from_secs(12)));

        headers.insert(reqwest::header::RETRY_AFTER, "not-a-number".parse().unwrap());
        assert_eq!(retry_after_seconds(&headers), None);
    }
}
