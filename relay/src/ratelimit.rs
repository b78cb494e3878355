//! Token-bucket rate limiting.
//!
//! One keyed limiter guards connection admission per IP; another guards the
//! inbound message path per `(room, client)`. Buckets refill continuously
//! at `rate` tokens per second up to `burst`; a bucket that has sat idle
//! and full for long enough is garbage collected by the sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long an idle bucket survives before the sweep reclaims it.
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_touched: Instant,
}

impl TokenBucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_touched: Instant::now(),
        }
    }

    fn try_acquire(&mut self, rate: f64, burst: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_touched).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_touched = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A keyed token-bucket limiter.
#[derive(Debug)]
pub struct RateLimiter<K: Eq + Hash> {
    buckets: Mutex<HashMap<K, TokenBucket>>,
    rate: f64,
    burst: f64,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    /// A limiter refilling `rate` tokens per second up to `burst`.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate,
            burst,
        }
    }

    /// Take one token for `key`. Returns `false` when the key is out of
    /// budget.
    pub fn check(&self, key: &K) -> bool {
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.rate, self.burst)
    }

    /// Reclaim buckets idle past the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut buckets = self.buckets.lock().expect("limiter lock poisoned");
        let before = buckets.len();
        let cutoff = Instant::now();
        buckets.retain(|_, bucket| {
            cutoff.duration_since(bucket.last_touched) < BUCKET_IDLE_TTL
        });
        before - buckets.len()
    }

    /// Number of tracked keys (tests and metrics).
    pub fn tracked(&self) -> usize {
        self.buckets.lock().expect("limiter lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_refusal() {
        let limiter: RateLimiter<&str> = RateLimiter::new(1.0, 3.0);
        assert!(limiter.check(&"10.0.0.1"));
        assert!(limiter.check(&"10.0.0.1"));
        assert!(limiter.check(&"10.0.0.1"));
        // Burst exhausted; refill is 1/s so the fourth call loses.
        assert!(!limiter.check(&"10.0.0.1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter: RateLimiter<&str> = RateLimiter::new(1.0, 1.0);
        assert!(limiter.check(&"10.0.0.1"));
        assert!(!limiter.check(&"10.0.0.1"));
        assert!(limiter.check(&"10.0.0.2"));
    }

    #[test]
    fn test_compound_keys() {
        let limiter: RateLimiter<(String, String)> = RateLimiter::new(10.0, 2.0);
        let key_a = ("room-1".to_string(), "client-a".to_string());
        let key_b = ("room-1".to_string(), "client-b".to_string());
        assert!(limiter.check(&key_a));
        assert!(limiter.check(&key_a));
        assert!(!limiter.check(&key_a));
        assert!(limiter.check(&key_b));
    }

    #[test]
    fn test_sweep_keeps_recent_buckets() {
        let limiter: RateLimiter<&str> = RateLimiter::new(1.0, 1.0);
        limiter.check(&"10.0.0.1");
        assert_eq!(limiter.tracked(), 1);
        // Freshly touched buckets survive the sweep.
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.tracked(), 1);
    }
}
