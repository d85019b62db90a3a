//! Per-venue token buckets.
//!
//! `rate_per_minute` tokens replenish uniformly with a `burst` ceiling;
//! callers that would overdraw block until refill. HTTP 429 backoff is
//! layered on top of this in the HTTP engine, independent of bucket state.

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct TokenBucket {
    limiter: DirectLimiter,
    rate_per_minute: u32,
    burst: u32,
}

impl TokenBucket {
    pub fn new(rate_per_minute: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(rate_per_minute.max(1)).expect("clamped above zero");
        let burst_cap = NonZeroU32::new(burst.max(1)).expect("clamped above zero");
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(rate).allow_burst(burst_cap)),
            rate_per_minute: rate_per_minute.max(1),
            burst: burst.max(1),
        }
    }

    /// Block until a token is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn rate_per_minute(&self) -> u32 {
        self.rate_per_minute
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_tokens_are_available_immediately() {
        let bucket = TokenBucket::new(60, 5);
        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        // Bucket drained; refill takes a second per token at 60/min.
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn zero_rate_is_clamped() {
        let bucket = TokenBucket::new(0, 0);
        assert_eq!(bucket.rate_per_minute(), 1);
        assert_eq!(bucket.burst(), 1);
        assert!(bucket.try_acquire());
    }

    #[tokio::test]
    async fn acquire_returns_within_burst() {
        let bucket = TokenBucket::new(600, 3);
        // Must not block for the first `burst` acquisitions.
        let start = std::time::Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed().as_millis() < 100);
    }
}
