//! Token bucket pacing for upstream probe requests.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens (burst capacity).
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    pub initial_tokens: u32,
}

impl RateLimiterConfig {
    /// One request per `interval`, no burst.
    pub fn one_per(interval: Duration) -> Result<Self> {
        let secs = interval.as_secs_f64();
        if !secs.is_finite() || secs <= 0.0 {
            return Err(Error::config(format!(
                "rate limit interval must be positive, got {:?}",
                interval
            )));
        }
        Ok(Self {
            max_tokens: 1,
            refill_rate: 1.0 / secs,
            initial_tokens: 1,
        })
    }
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: f64,
    max_tokens: u32,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            tokens: config.initial_tokens as f64,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Returns `true` if a token was taken.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take a token, sleeping until one is available. Returns the time waited.
    pub async fn acquire(&mut self) -> Duration {
        let mut total_wait = Duration::ZERO;

        loop {
            let wait = self.time_until_available();
            if wait.is_zero() {
                self.tokens -= 1.0;
                return total_wait;
            }

            debug!("Probe rate limited, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
            total_wait += wait;
        }
    }

    pub fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate)
            .min(self.max_tokens as f64);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_per_interval_has_no_burst() {
        let config = RateLimiterConfig::one_per(Duration::from_secs(20)).unwrap();
        let mut limiter = RateLimiter::new(config);

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        let wait = limiter.time_until_available();
        assert!(wait > Duration::from_secs(19) && wait <= Duration::from_secs(20));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(RateLimiterConfig::one_per(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let config = RateLimiterConfig::one_per(Duration::from_millis(20)).unwrap();
        let mut limiter = RateLimiter::new(config);

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        let waited = limiter.acquire().await;
        assert!(waited > Duration::ZERO);
    }
}
