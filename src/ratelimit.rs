//! Token-bucket rate limiter (§4.7).
//!
//! One bucket per (subject identity or anonymous-peer key), refilled
//! continuously at a configured per-minute rate and checked on every
//! request. Structurally grounded on `credential::CredentialCache`: the
//! same `Mutex<HashMap<String, _>>` keyed-entry idiom, just with a refill
//! computation instead of a TTL expiry check.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, now: Instant) -> RateLimitDecision {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitDecision {
                allowed: true,
                remaining: self.tokens.floor() as u32,
                retry_after_secs: 0,
            }
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_secs = if self.refill_per_sec > 0.0 {
                (deficit / self.refill_per_sec).ceil() as u64
            } else {
                60
            };
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: wait_secs.max(1),
            }
        }
    }
}

/// Per-key token-bucket limiter. One instance is shared (behind an `Arc`)
/// across the whole process; buckets are created lazily on first use.
pub struct RateLimiter {
    anonymous_per_minute: u32,
    authenticated_per_minute: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(anonymous_per_minute: u32, authenticated_per_minute: u32) -> Self {
        Self {
            anonymous_per_minute,
            authenticated_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// `key` is the subject id for authenticated callers or a
    /// connection-derived key (e.g. remote peer address) for anonymous
    /// ones. `authenticated` selects which configured rate applies.
    pub fn check(&self, key: &str, authenticated: bool) -> RateLimitDecision {
        let capacity = if authenticated {
            self.authenticated_per_minute
        } else {
            self.anonymous_per_minute
        };
        let refill_per_sec = capacity as f64 / 60.0;

        let mut buckets = self.buckets.lock().expect("ratelimit bucket lock poisoned");
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(capacity, refill_per_sec));
        bucket.try_take(Instant::now())
    }

    /// Drops buckets untouched for longer than `idle_for`. Intended to be
    /// called periodically from a background task so memory does not grow
    /// unboundedly with the number of distinct anonymous peers seen.
    pub fn sweep_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("ratelimit bucket lock poisoned");
        buckets.retain(|_, b| now.duration_since(b.last_refill) < idle_for);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_capacity() {
        let limiter = RateLimiter::new(60, 600);
        for _ in 0..5 {
            let decision = limiter.check("anon:127.0.0.1", false);
            assert!(decision.allowed);
        }
    }

    #[test]
    fn denies_once_capacity_is_exhausted() {
        let limiter = RateLimiter::new(2, 600);
        assert!(limiter.check("anon:1.2.3.4", false).allowed);
        assert!(limiter.check("anon:1.2.3.4", false).allowed);
        let denied = limiter.check("anon:1.2.3.4", false);
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0);
    }

    #[test]
    fn authenticated_and_anonymous_rates_are_independent() {
        let limiter = RateLimiter::new(1, 600);
        assert!(limiter.check("user-1", true).allowed);
        assert!(limiter.check("user-1", true).allowed);
        assert!(limiter.check("user-1", true).allowed);
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(1, 600);
        assert!(limiter.check("anon:a", false).allowed);
        assert!(!limiter.check("anon:a", false).allowed);
        assert!(limiter.check("anon:b", false).allowed);
    }

    #[test]
    fn sweep_idle_removes_stale_buckets() {
        let limiter = RateLimiter::new(10, 600);
        let _ = limiter.check("anon:a", false);
        limiter.sweep_idle(Duration::from_secs(0));
        assert_eq!(limiter.buckets.lock().unwrap().len(), 0);
    }
}
