//! Delay policy for the rate-limited audit queue.
//!
//! The effective delay for an event is the max of:
//! - a per-flow exponential backoff (repeats of a flow that is still pending),
//! - a shared token bucket (overall rate smoothing).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Per-key exponential backoff.
///
/// The first occurrence of a key is not delayed; the n-th additional occurrence
/// waits `base * 2^(n-1)`, capped at `max`. `forget` resets the key.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    seen: HashMap<u64, u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            seen: HashMap::new(),
        }
    }

    pub fn when(&mut self, key: u64) -> Duration {
        let n = self.seen.entry(key).or_insert(0);
        let repeats = *n;
        *n = n.saturating_add(1);
        if repeats == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(repeats - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn forget(&mut self, key: u64) {
        self.seen.remove(&key);
    }

    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

/// Token bucket handing out reservations instead of yes/no answers.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(qps: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate: f64::from(qps.max(1)),
            capacity,
            tokens: capacity,
            last: Instant::now(),
        }
    }

    /// Take one token; returns how long the caller must wait for it.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last);
        if elapsed.is_zero() {
            return;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last = now;
    }
}

/// Combined limiter used by `RateLimitedQueue`.
#[derive(Debug)]
pub struct RateLimiter {
    backoff: ExponentialBackoff,
    bucket: TokenBucket,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::new(
                Duration::from_millis(cfg.base_delay_ms),
                Duration::from_millis(cfg.max_delay_ms),
            ),
            bucket: TokenBucket::new(cfg.qps, cfg.burst),
        }
    }

    pub fn when(&mut self, key: u64, now: Instant) -> Duration {
        let backoff = self.backoff.when(key);
        let bucket = self.bucket.reserve(now);
        backoff.max(bucket)
    }

    pub fn forget(&mut self, key: u64) {
        self.backoff.forget(key);
    }

    pub fn tracked(&self) -> usize {
        self.backoff.tracked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(30));
        assert_eq!(b.when(1), Duration::ZERO);
        assert_eq!(b.when(1), Duration::from_millis(5));
        assert_eq!(b.when(1), Duration::from_millis(10));
        assert_eq!(b.when(1), Duration::from_millis(20));
        assert_eq!(b.when(1), Duration::from_millis(30));
        assert_eq!(b.when(1), Duration::from_millis(30));
        // other keys are independent
        assert_eq!(b.when(2), Duration::ZERO);
        b.forget(1);
        assert_eq!(b.when(1), Duration::ZERO);
    }

    #[test]
    fn backoff_saturates_on_many_repeats() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(60));
        for _ in 0..100 {
            b.when(7);
        }
        assert_eq!(b.when(7), Duration::from_secs(60));
    }

    #[test]
    fn bucket_allows_burst_then_delays() {
        let now = Instant::now();
        let mut tb = TokenBucket::new(10, 2);
        assert_eq!(tb.reserve(now), Duration::ZERO);
        assert_eq!(tb.reserve(now), Duration::ZERO);
        let d = tb.reserve(now);
        assert!(d > Duration::from_millis(90) && d <= Duration::from_millis(100), "{d:?}");
    }

    #[test]
    fn bucket_refills_over_time() {
        let now = Instant::now();
        let mut tb = TokenBucket::new(10, 1);
        assert_eq!(tb.reserve(now), Duration::ZERO);
        assert_eq!(tb.reserve(now + Duration::from_millis(200)), Duration::ZERO);
    }
}
