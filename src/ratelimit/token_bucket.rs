//! Token bucket limiter.
//!
//! Each key owns a bucket holding up to `limit × capacity_multiplier`
//! tokens. The bucket refills continuously at `limit / window` tokens per
//! second and every admitted request takes one token, so bursts up to the
//! capacity are absorbed while the long-run rate stays at `limit / window`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{default_clock, secs, Clock};
use super::policy::Policy;
use super::result::RateLimitResult;
use super::store::KeyStore;
use crate::error::{GatekeeperError, Result};

/// Tag reported in results produced by this limiter.
pub const TOKEN_BUCKET: &str = "token_bucket";

/// Bucket size relative to the per-window limit when not configured.
pub const DEFAULT_CAPACITY_MULTIPLIER: f64 = 2.0;

/// Per-key bucket state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Always within `[0, capacity]`
    tokens: f64,
    last_refill: Duration,
}

/// Token bucket rate limiter.
pub struct TokenBucketLimiter {
    capacity_multiplier: f64,
    buckets: KeyStore<Bucket>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a limiter with the default capacity multiplier.
    pub fn new() -> Self {
        Self {
            capacity_multiplier: DEFAULT_CAPACITY_MULTIPLIER,
            buckets: KeyStore::new(),
            clock: default_clock(),
        }
    }

    /// Create a limiter whose buckets hold `limit × multiplier` tokens.
    pub fn with_capacity_multiplier(multiplier: f64) -> Result<Self> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(GatekeeperError::Config(format!(
                "capacity multiplier must be a positive number, got {}",
                multiplier
            )));
        }
        Ok(Self {
            capacity_multiplier: multiplier,
            ..Self::new()
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn capacity_multiplier(&self) -> f64 {
        self.capacity_multiplier
    }

    /// Bucket capacity for a policy.
    pub fn capacity(&self, policy: &Policy) -> f64 {
        policy.limit as f64 * self.capacity_multiplier
    }

    /// Refill, then try to take one token for `key`.
    ///
    /// `last_refill` moves to now on every call, including denials.
    pub fn check(&self, key: &str, policy: &Policy) -> Result<RateLimitResult> {
        policy.validate()?;

        let rate = policy.rate();
        let capacity = self.capacity(policy);
        // An untouched bucket is indistinguishable from a new one once full
        let refill_time = secs(capacity / rate);

        let result = self.buckets.with_state(
            key,
            self.clock.as_ref(),
            refill_time,
            |now| {
                debug!(key = %key, capacity = capacity, rate = rate, "Creating new token bucket");
                Bucket {
                    tokens: capacity,
                    last_refill: now,
                }
            },
            |bucket, now| {
                let elapsed = now.saturating_sub(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    let reset_time = now.saturating_add(secs((capacity - bucket.tokens) / rate));
                    RateLimitResult::allow(
                        TOKEN_BUCKET,
                        policy.limit,
                        bucket.tokens.floor() as u64,
                        reset_time,
                    )
                } else {
                    let retry_after = secs((1.0 - bucket.tokens) / rate);
                    let reset_time = now.saturating_add(secs((capacity - bucket.tokens) / rate));
                    RateLimitResult::deny(TOKEN_BUCKET, policy.limit, reset_time, retry_after)
                }
            },
        );

        trace!(
            key = %key,
            allowed = result.allowed(),
            remaining = result.remaining(),
            "Token bucket check"
        );

        Ok(result)
    }

    /// Tokens currently stored for `key`, without applying a refill.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets.inspect(key, |bucket| bucket.tokens)
    }

    /// Forget the bucket for `key`; its next check starts full.
    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Number of keys with a bucket.
    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle for at least `idle_ttl`.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        self.buckets.evict_idle(self.clock.now(), idle_ttl)
    }
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("capacity_multiplier", &self.capacity_multiplier)
            .field("keys", &self.buckets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::{ManualClock, StallingClock};

    fn limiter() -> (TokenBucketLimiter, ManualClock) {
        let clock = ManualClock::new(Duration::from_secs(1_000));
        let limiter = TokenBucketLimiter::new().with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn policy() -> Policy {
        Policy::from_secs(10, 60)
    }

    #[test]
    fn test_burst_up_to_capacity() {
        let (limiter, _clock) = limiter();

        for i in 0..20 {
            let result = limiter.check("client", &policy()).unwrap();
            assert!(result.allowed(), "request {} should be allowed", i + 1);
            assert_eq!(result.remaining(), 19 - i);
            assert_eq!(result.limit_type(), TOKEN_BUCKET);
        }
    }

    #[test]
    fn test_denial_after_capacity() {
        let (limiter, _clock) = limiter();

        for _ in 0..20 {
            limiter.check("client", &policy()).unwrap();
        }

        let result = limiter.check("client", &policy()).unwrap();
        assert!(!result.allowed());
        assert_eq!(result.remaining(), 0);
        let retry = result.retry_after().unwrap().as_secs_f64();
        assert!((retry - 6.0).abs() < 1e-6, "retry_after was {}", retry);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (limiter, clock) = limiter();

        for _ in 0..20 {
            limiter.check("client", &policy()).unwrap();
        }

        // One window refills limit tokens
        clock.advance(Duration::from_secs(60));
        limiter.check("client", &policy()).unwrap();
        assert!((limiter.tokens("client").unwrap() - 9.0).abs() < 1e-9);

        // A long idle period never exceeds capacity
        clock.advance(Duration::from_secs(6_000));
        let mut allowed = 0;
        while limiter.check("client", &policy()).unwrap().allowed() {
            allowed += 1;
        }
        assert_eq!(allowed, 20);
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let (limiter, clock) = limiter();
        let capacity = limiter.capacity(&policy());

        for step in 0..200u64 {
            limiter.check("client", &policy()).unwrap();
            let tokens = limiter.tokens("client").unwrap();
            assert!(tokens >= 0.0 && tokens <= capacity, "tokens {} out of range", tokens);
            clock.advance(Duration::from_millis((step % 7) * 900));
        }
    }

    #[test]
    fn test_denial_updates_last_refill() {
        let (limiter, clock) = limiter();

        for _ in 0..20 {
            limiter.check("client", &policy()).unwrap();
        }

        // Half a token accrues, the denied check folds it in
        clock.advance(Duration::from_secs(3));
        let denied = limiter.check("client", &policy()).unwrap();
        assert!(!denied.allowed());
        let after_denial = limiter.tokens("client").unwrap();
        assert!((after_denial - 0.5).abs() < 1e-9);

        // The remaining half token needs another 3 seconds, not 6
        let retry = denied.retry_after().unwrap().as_secs_f64();
        assert!((retry - 3.0).abs() < 1e-6);

        clock.advance(Duration::from_secs(4));
        assert!(limiter.check("client", &policy()).unwrap().allowed());
    }

    #[test]
    fn test_empty_then_refilled() {
        let (limiter, clock) = limiter();

        while limiter.check("client", &policy()).unwrap().allowed() {}
        assert!(!limiter.check("client", &policy()).unwrap().allowed());

        clock.advance(Duration::from_secs(7));
        assert!(limiter.check("client", &policy()).unwrap().allowed());
        assert!(!limiter.check("client", &policy()).unwrap().allowed());
    }

    #[test]
    fn test_reset_time_is_full_capacity() {
        let (limiter, clock) = limiter();
        let now = clock.now();

        // One token spent, 6 seconds to earn it back
        let result = limiter.check("client", &policy()).unwrap();
        let until_reset = result.reset_time() - now;
        assert!((until_reset.as_secs_f64() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter();

        for _ in 0..20 {
            limiter.check("a", &policy()).unwrap();
        }
        assert!(!limiter.check("a", &policy()).unwrap().allowed());
        assert!(limiter.check("b", &policy()).unwrap().allowed());
        assert_eq!(limiter.key_count(), 2);
    }

    #[test]
    fn test_custom_multiplier() {
        let limiter = TokenBucketLimiter::with_capacity_multiplier(1.0).unwrap();
        let policy = Policy::from_secs(3, 60);

        for _ in 0..3 {
            assert!(limiter.check("client", &policy).unwrap().allowed());
        }
        assert!(!limiter.check("client", &policy).unwrap().allowed());
    }

    #[test]
    fn test_invalid_multiplier() {
        assert!(TokenBucketLimiter::with_capacity_multiplier(0.0).is_err());
        assert!(TokenBucketLimiter::with_capacity_multiplier(f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_policy_fails_fast() {
        let (limiter, _clock) = limiter();
        let result = limiter.check("client", &Policy::from_secs(0, 60));
        assert!(matches!(result, Err(GatekeeperError::Policy(_))));
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_reset_and_evict() {
        let (limiter, clock) = limiter();

        for _ in 0..20 {
            limiter.check("client", &policy()).unwrap();
        }
        limiter.reset("client");
        assert!(limiter.tokens("client").is_none());
        assert!(limiter.check("client", &policy()).unwrap().allowed());

        clock.advance(Duration::from_secs(180));
        assert_eq!(limiter.evict_idle(Duration::from_secs(60)), 1);
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_concurrent_checks_consume_exactly_capacity() {
        let clock = ManualClock::new(Duration::from_secs(1_000));
        let limiter = Arc::new(TokenBucketLimiter::new().with_clock(Arc::new(clock)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| limiter.check("shared", &policy()).unwrap().allowed())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 20);
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let (limiter, _clock) = limiter();
        let policy = Policy::new(1, Duration::MAX);

        assert!(limiter.check("client", &policy).unwrap().allowed());
        assert!(limiter.check("client", &policy).unwrap().allowed());
        let denied = limiter.check("client", &policy).unwrap();
        assert!(!denied.allowed());
        assert_eq!(denied.reset_time(), Duration::MAX);
    }

    #[test]
    fn test_stale_clock_reading_does_not_double_refill() {
        let manual = ManualClock::new(Duration::from_secs(1_000));
        let clock = StallingClock::new(manual.clone(), Duration::from_millis(300));
        let limiter = Arc::new(TokenBucketLimiter::new().with_clock(Arc::new(clock.clone())));

        while limiter.check("client", &policy()).unwrap().allowed() {}

        // This check samples t=1000 and then stalls
        clock.arm();
        let stalled = {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || limiter.check("client", &policy()).unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));

        // One window later: 10 tokens refilled, one spent
        manual.advance(Duration::from_secs(60));
        assert!(limiter.check("client", &policy()).unwrap().allowed());
        assert!(!stalled.join().unwrap().allowed());
        assert!((limiter.tokens("client").unwrap() - 9.0).abs() < 1e-9);

        // Another window adds 10 more, not 20
        manual.advance(Duration::from_secs(60));
        let mut allowed = 0;
        while limiter.check("client", &policy()).unwrap().allowed() {
            allowed += 1;
        }
        assert_eq!(allowed, 19);
    }

    #[test]
    fn test_partial_bucket_survives_idle_eviction() {
        let (limiter, clock) = limiter();
        let policy = Policy::from_secs(10, 3_600);

        for _ in 0..20 {
            limiter.check("client", &policy).unwrap();
        }

        // Refilling 20 tokens takes two hours; after one the bucket is kept
        clock.advance(Duration::from_secs(3_600));
        assert_eq!(limiter.evict_idle(Duration::from_secs(60)), 0);
        let mut allowed = 0;
        while limiter.check("client", &policy).unwrap().allowed() {
            allowed += 1;
        }
        assert_eq!(allowed, 10);
    }
}
