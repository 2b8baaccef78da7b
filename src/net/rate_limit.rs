//! Per-source token-bucket rate limiting.
//!
//! Buckets are shared across all collectors for a source, and the CRM bucket
//! is shared between the pusher and the suppression sync. `acquire` suspends
//! cooperatively; it never busy-waits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RateLimitSpec;
use crate::error::NetError;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Async token bucket. `rate` tokens refill per `period`; at most `burst`
/// tokens accumulate.
#[derive(Debug)]
pub struct RateLimiter {
    /// None = unlimited source.
    shape: Option<RateLimitSpec>,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(spec: RateLimitSpec) -> Self {
        Self {
            shape: Some(spec),
            state: Mutex::new(BucketState {
                tokens: spec.burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A limiter that always admits immediately.
    pub fn unlimited() -> Self {
        Self {
            shape: None,
            state: Mutex::new(BucketState {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire permission for one request. Suspends until a token is
    /// available or the cancellation token fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), NetError> {
        let Some(spec) = self.shape else {
            return Ok(());
        };

        let per_token = Duration::from_secs_f64(spec.period_secs as f64 / spec.rate as f64);

        loop {
            if cancel.is_cancelled() {
                return Err(NetError::Cancelled);
            }

            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill);
                let refill = elapsed.as_secs_f64() * (spec.rate as f64 / spec.period_secs as f64);
                state.tokens = (state.tokens + refill).min(spec.burst as f64);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                per_token.mul_f64(1.0 - state.tokens)
            };

            debug!(wait_ms = wait.as_millis() as u64, "rate limit: waiting for token");
            tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Factory for per-source limiters with sensible defaults per source API.
/// Configured overrides win.
pub struct RateLimiterPool {
    overrides: HashMap<String, RateLimitSpec>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterPool {
    pub fn new(overrides: HashMap<String, RateLimitSpec>) -> Self {
        Self {
            overrides,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the shared limiter for a source API.
    pub async fn get(&self, source_api: &str) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().await;
        if let Some(limiter) = limiters.get(source_api) {
            return Arc::clone(limiter);
        }

        let limiter = Arc::new(match self.overrides.get(source_api).copied() {
            Some(spec) => RateLimiter::new(spec),
            None => match default_limit(source_api) {
                Some(spec) => RateLimiter::new(spec),
                None => RateLimiter::unlimited(),
            },
        });
        limiters.insert(source_api.to_string(), Arc::clone(&limiter));
        limiter
    }
}

/// Published or conservative limits per source.
fn default_limit(source_api: &str) -> Option<RateLimitSpec> {
    let (rate, period_secs, burst) = match source_api {
        // GitHub REST: 5000/hour authenticated.
        "github" | "github_activity" => (5000, 3600, 10),
        // SEC EDGAR fair-access policy: 10/second.
        "sec_edgar" => (10, 1, 10),
        // Companies House: 600 per 5 minutes.
        "companies_house" => (600, 300, 10),
        // Conservative; GraphQL complexity limits are opaque.
        "product_hunt" => (100, 3600, 5),
        "hacker_news" => (100, 60, 10),
        "crunchbase" => (200, 60, 10),
        // Notion: 3 requests/second average.
        "notion" => (3, 1, 3),
        // RDAP, ArXiv, PatentsView, job boards: no published cap.
        _ => return None,
    };
    Some(RateLimitSpec {
        rate,
        period_secs,
        burst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_admits_immediately_then_waits() {
        let limiter = RateLimiter::new(RateLimitSpec {
            rate: 10,
            period_secs: 1,
            burst: 2,
        });
        let cancel = CancellationToken::new();

        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));

        // Third token has to be refilled at 10/s.
        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let limiter = RateLimiter::new(RateLimitSpec {
            rate: 1,
            period_secs: 60,
            burst: 1,
        });
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let cancel = cancel.clone();
            async move { limiter.acquire(&cancel).await }
        };
        cancel.cancel();
        let result = waiter.await;
        assert!(matches!(result, Err(NetError::Cancelled)));
    }

    #[tokio::test]
    async fn pool_shares_buckets_per_source() {
        let pool = RateLimiterPool::new(HashMap::new());
        let a = pool.get("sec_edgar").await;
        let b = pool.get("sec_edgar").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn pool_override_wins() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "sec_edgar".to_string(),
            RateLimitSpec {
                rate: 1,
                period_secs: 60,
                burst: 1,
            },
        );
        let pool = RateLimiterPool::new(overrides);
        let limiter = pool.get("sec_edgar").await;
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        // Second acquire would wait ~60s under the override; don't wait, just
        // observe the bucket is drained.
        let state = limiter.state.lock().await;
        assert!(state.tokens < 1.0);
    }
}
