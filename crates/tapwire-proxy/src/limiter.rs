//! Token-bucket admission control.
//!
//! A single bucket shared by all listeners gates every inbound request
//! before any other work. `try_acquire` never blocks: a denied request is
//! terminated with 429 immediately.

use parking_lot::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter admitting `rate` requests per second with the
    /// given burst capacity. A rate of zero (or less) disables limiting.
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0.0, 1)
    }

    /// Take one token if available. Wait-free from the caller's view;
    /// ordering among concurrent callers is unspecified.
    pub fn try_acquire(&self) -> bool {
        if self.rate <= 0.0 {
            return true;
        }

        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_deny() {
        let limiter = RateLimiter::new(1.0, 1);
        assert!(limiter.try_acquire());
        // Second back-to-back request exceeds the bucket.
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_burst_capacity() {
        let limiter = RateLimiter::new(1.0, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(1000.0, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_zero_rate_disables_limiting() {
        let limiter = RateLimiter::disabled();
        for _ in 0..10_000 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_tokens_capped_at_burst() {
        let limiter = RateLimiter::new(1000.0, 2);
        std::thread::sleep(std::time::Duration::from_millis(20));
        // Despite the long idle period only `burst` tokens are available.
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
