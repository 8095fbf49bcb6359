//! Token-bucket rate limiter
//!
//! One limiter is shared by every provider call of an invocation, so the
//! provider's request budget holds no matter how many windows are requested.
//! Waiting suspends the caller until enough tokens have refilled; the only way
//! out of a wait besides capacity is the cancellation token.

use costline_common::ProviderError;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Smallest refill rate accepted, avoids unbounded waits
const MIN_REFILL_PER_SEC: f64 = 1e-6;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter
pub struct RateLimiter {
    /// Tokens added per second
    refill_per_sec: f64,
    /// Bucket capacity
    burst: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket
    pub fn new(refill_per_sec: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            refill_per_sec: refill_per_sec.max(MIN_REFILL_PER_SEC),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Tokens currently available
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Wait until `n` tokens are available and take them.
    ///
    /// Fails without consuming anything when `cancel` fires or when `n` can
    /// never be satisfied by the bucket.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let wanted = f64::from(n);
        if wanted > self.burst {
            return Err(ProviderError::RateLimiterAborted(format!(
                "requested {} tokens exceeds limiter burst of {}",
                n, self.burst
            )));
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::RateLimiterAborted("wait cancelled".into()));
        }

        let mut announced = false;
        loop {
            let wait = match self.try_take(wanted) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            if !announced {
                info!(wait_ms = wait.as_millis() as u64, "Rate limit reached, holding request until capacity is back");
                announced = true;
            } else {
                debug!(wait_ms = wait.as_millis() as u64, "Still waiting for rate limiter capacity");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProviderError::RateLimiterAborted("wait cancelled".into()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take `wanted` tokens, or report how long until they would be available
    fn try_take(&self, wanted: f64) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= wanted {
            state.tokens -= wanted;
            Ok(())
        } else {
            let deficit = wanted - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.burst);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_available_immediately() {
        let limiter = RateLimiter::new(1.0, 2);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(1, &cancel).await.unwrap();
        limiter.acquire(1, &cancel).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.available() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_refill() {
        // 0.1 tokens/sec: one request every 10 seconds
        let limiter = RateLimiter::new(0.1, 1);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(1, &cancel).await.unwrap();
        limiter.acquire(1, &cancel).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_fails() {
        let limiter = RateLimiter::new(0.1, 1);
        let cancel = CancellationToken::new();
        limiter.acquire(1, &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = limiter.acquire(1, &cancel).await;
        assert!(matches!(result, Err(ProviderError::RateLimiterAborted(_))));
    }

    #[tokio::test]
    async fn test_request_larger_than_burst_fails() {
        let limiter = RateLimiter::new(1.0, 1);
        let result = limiter.acquire(2, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ProviderError::RateLimiterAborted(_))));
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_fast() {
        let limiter = RateLimiter::new(1.0, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(limiter.acquire(1, &cancel).await.is_err());
        assert_eq!(limiter.available(), 5.0);
    }
}
