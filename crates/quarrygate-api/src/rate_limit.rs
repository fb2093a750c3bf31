//! Per-subject rate limiting against the per-role `{requests, window}`
//! ceiling, with a choice of fixed-window, sliding-window, or
//! token-bucket accounting.

use parking_lot::RwLock;
use quarrygate_common::GatewayError;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAlgorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

struct Entry {
    window_start: Instant,
    count: u32,
    timestamps: Vec<Instant>,
    tokens: f64,
    last_update: Instant,
}

impl Entry {
    fn new(policy: &RateLimitPolicy) -> Self {
        let now = Instant::now();
        Entry { window_start: now, count: 0, timestamps: Vec::new(), tokens: policy.max_requests as f64, last_update: now }
    }
}

/// Shared per-subject rate-limit store. The schema registry is
/// immutable after load and lock-free to read; this is the one piece
/// of genuinely shared mutable state the request pipeline touches, so
/// every access is a short-held lock per key.
pub struct RateLimiter {
    algorithm: RateLimitAlgorithm,
    store: RwLock<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(algorithm: RateLimitAlgorithm) -> Self {
        Self { algorithm, store: RwLock::new(HashMap::new()) }
    }

    /// Checks and, if allowed, records one request against `key` under
    /// `policy`. Returns the retry-after hint on exhaustion.
    pub fn acquire(&self, key: &str, policy: &RateLimitPolicy) -> Result<(), GatewayError> {
        let mut store = self.store.write();
        let entry = store.entry(key.to_string()).or_insert_with(|| Entry::new(policy));
        let now = Instant::now();

        match self.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                if now.duration_since(entry.window_start) >= policy.window {
                    entry.window_start = now;
                    entry.count = 0;
                }
                if entry.count >= policy.max_requests {
                    let retry_after = policy.window - now.duration_since(entry.window_start);
                    return Err(rate_limit_error(retry_after));
                }
                entry.count += 1;
                Ok(())
            }
            RateLimitAlgorithm::SlidingWindow => {
                let cutoff = now - policy.window;
                entry.timestamps.retain(|t| *t > cutoff);
                if entry.timestamps.len() as u32 >= policy.max_requests {
                    let oldest = entry.timestamps.iter().min().copied().unwrap_or(now);
                    let retry_after = policy.window - now.duration_since(oldest);
                    return Err(rate_limit_error(retry_after));
                }
                entry.timestamps.push(now);
                Ok(())
            }
            RateLimitAlgorithm::TokenBucket => {
                let elapsed = now.duration_since(entry.last_update);
                let refill_rate = policy.max_requests as f64 / policy.window.as_secs_f64();
                entry.tokens = (entry.tokens + elapsed.as_secs_f64() * refill_rate).min(policy.max_requests as f64);
                entry.last_update = now;
                if entry.tokens < 1.0 {
                    let retry_after = Duration::from_secs_f64(1.0 / refill_rate);
                    return Err(rate_limit_error(retry_after));
                }
                entry.tokens -= 1.0;
                Ok(())
            }
        }
    }

    pub fn reset(&self, key: &str) {
        self.store.write().remove(key);
    }
}

fn rate_limit_error(retry_after: Duration) -> GatewayError {
    GatewayError::RateLimit {
        message: "rate limit exceeded".to_string(),
        retry_after_secs: retry_after.as_secs().max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_window_denies_after_limit_is_reached() {
        let limiter = RateLimiter::new(RateLimitAlgorithm::FixedWindow);
        let policy = RateLimitPolicy { max_requests: 2, window: Duration::from_secs(60) };
        assert!(limiter.acquire("u1", &policy).is_ok());
        assert!(limiter.acquire("u1", &policy).is_ok());
        let err = limiter.acquire("u1", &policy).unwrap_err();
        assert_eq!(err.kind().as_str(), "rateLimit");
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitAlgorithm::SlidingWindow);
        let policy = RateLimitPolicy { max_requests: 1, window: Duration::from_secs(60) };
        assert!(limiter.acquire("a", &policy).is_ok());
        assert!(limiter.acquire("b", &policy).is_ok());
        assert!(limiter.acquire("a", &policy).is_err());
    }

    #[test]
    fn token_bucket_allows_up_to_capacity() {
        let limiter = RateLimiter::new(RateLimitAlgorithm::TokenBucket);
        let policy = RateLimitPolicy { max_requests: 3, window: Duration::from_secs(60) };
        assert!(limiter.acquire("u1", &policy).is_ok());
        assert!(limiter.acquire("u1", &policy).is_ok());
        assert!(limiter.acquire("u1", &policy).is_ok());
        assert!(limiter.acquire("u1", &policy).is_err());
    }
}
