//! The closed set of limiting algorithms behind one interface.

use std::time::Duration;

use super::composite::CompositeLimiter;
use super::fixed_window::FixedWindowLimiter;
use super::policy::Policy;
use super::result::RateLimitResult;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::error::Result;

/// A rate limiter: one of the supported algorithms.
///
/// Construct once at startup and share by reference (typically behind an
/// `Arc`); each variant owns its per-key state.
#[derive(Debug)]
pub enum RateLimiter {
    TokenBucket(TokenBucketLimiter),
    SlidingWindow(SlidingWindowLimiter),
    FixedWindow(FixedWindowLimiter),
    Composite(CompositeLimiter),
}

impl RateLimiter {
    /// Check whether `key` may make one more request under `policy`.
    pub fn check(&self, key: &str, policy: &Policy) -> Result<RateLimitResult> {
        match self {
            RateLimiter::TokenBucket(limiter) => limiter.check(key, policy),
            RateLimiter::SlidingWindow(limiter) => limiter.check(key, policy),
            RateLimiter::FixedWindow(limiter) => limiter.check(key, policy),
            RateLimiter::Composite(limiter) => limiter.check(key, policy),
        }
    }

    /// Discard all state held for `key`.
    pub fn reset(&self, key: &str) {
        match self {
            RateLimiter::TokenBucket(limiter) => limiter.reset(key),
            RateLimiter::SlidingWindow(limiter) => limiter.reset(key),
            RateLimiter::FixedWindow(limiter) => limiter.reset(key),
            RateLimiter::Composite(limiter) => limiter.reset(key),
        }
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        match self {
            RateLimiter::TokenBucket(limiter) => limiter.key_count(),
            RateLimiter::SlidingWindow(limiter) => limiter.key_count(),
            RateLimiter::FixedWindow(limiter) => limiter.key_count(),
            RateLimiter::Composite(limiter) => limiter.key_count(),
        }
    }

    /// Drop keys that have not been checked for `idle_ttl`.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        match self {
            RateLimiter::TokenBucket(limiter) => limiter.evict_idle(idle_ttl),
            RateLimiter::SlidingWindow(limiter) => limiter.evict_idle(idle_ttl),
            RateLimiter::FixedWindow(limiter) => limiter.evict_idle(idle_ttl),
            RateLimiter::Composite(limiter) => limiter.evict_idle(idle_ttl),
        }
    }

    /// Short name of the algorithm.
    pub fn algorithm(&self) -> &'static str {
        match self {
            RateLimiter::TokenBucket(_) => "token_bucket",
            RateLimiter::SlidingWindow(_) => "sliding_window",
            RateLimiter::FixedWindow(_) => "fixed_window",
            RateLimiter::Composite(_) => "composite",
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::TokenBucket(TokenBucketLimiter::new())
    }
}

impl From<TokenBucketLimiter> for RateLimiter {
    fn from(limiter: TokenBucketLimiter) -> Self {
        RateLimiter::TokenBucket(limiter)
    }
}

impl From<SlidingWindowLimiter> for RateLimiter {
    fn from(limiter: SlidingWindowLimiter) -> Self {
        RateLimiter::SlidingWindow(limiter)
    }
}

impl From<FixedWindowLimiter> for RateLimiter {
    fn from(limiter: FixedWindowLimiter) -> Self {
        RateLimiter::FixedWindow(limiter)
    }
}

impl From<CompositeLimiter> for RateLimiter {
    fn from(limiter: CompositeLimiter) -> Self {
        RateLimiter::Composite(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_reports_algorithm() {
        let policy = Policy::from_secs(10, 60);
        let limiters: Vec<RateLimiter> = vec![
            TokenBucketLimiter::new().into(),
            SlidingWindowLimiter::new().into(),
            FixedWindowLimiter::new().into(),
        ];

        for limiter in &limiters {
            let result = limiter.check("client", &policy).unwrap();
            assert!(result.allowed());
            assert_eq!(result.limit_type(), limiter.algorithm());
            assert_eq!(limiter.key_count(), 1);
        }
    }

    #[test]
    fn test_default_is_token_bucket() {
        assert_eq!(RateLimiter::default().algorithm(), "token_bucket");
    }

    #[test]
    fn test_reset_through_enum() {
        let limiter: RateLimiter = FixedWindowLimiter::new().into();
        let policy = Policy::from_secs(1, 3_600);

        limiter.check("client", &policy).unwrap();
        assert!(!limiter.check("client", &policy).unwrap().allowed());
        limiter.reset("client");
        assert!(limiter.check("client", &policy).unwrap().allowed());
    }

    #[test]
    fn test_composite_scenario() {
        let clock = ManualClock::new(Duration::from_secs(1_200));
        let limiter: RateLimiter = CompositeLimiter::new()
            .with_member_policy(
                "token_bucket",
                TokenBucketLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(10, 60),
            )
            .with_member_policy(
                "fixed_window",
                FixedWindowLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(3, 60),
            )
            .into();

        let policy = Policy::default();
        for _ in 0..3 {
            assert!(limiter.check("client", &policy).unwrap().allowed());
        }
        let denied = limiter.check("client", &policy).unwrap();
        assert!(!denied.allowed());
        assert_eq!(denied.limit_type(), "fixed_window");
        assert_eq!(limiter.algorithm(), "composite");
    }

    #[test]
    fn test_evict_idle_through_enum() {
        let clock = ManualClock::new(Duration::from_secs(0));
        let limiter: RateLimiter = SlidingWindowLimiter::new()
            .with_clock(Arc::new(clock.clone()))
            .into();

        let policy = Policy::from_secs(100, 5);
        limiter.check("a", &policy).unwrap();
        clock.advance(Duration::from_secs(10));
        limiter.check("b", &policy).unwrap();

        assert_eq!(limiter.evict_idle(Duration::from_secs(5)), 1);
        assert_eq!(limiter.key_count(), 1);
    }
}
