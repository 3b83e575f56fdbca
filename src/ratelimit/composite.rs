//! Composite limiter: several named limiters applied to the same key.
//!
//! Every member is evaluated on every check, even after one of them has
//! denied. Members therefore keep consuming quota on denied requests (a
//! token bucket still loses a token when a fixed window refuses), which
//! keeps their state consistent from call to call. Short-circuiting would
//! change observable quota consumption and is not done.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use super::limiter::RateLimiter;
use super::policy::Policy;
use super::result::RateLimitResult;
use crate::error::{GatekeeperError, Result};

/// A named member of a [`CompositeLimiter`].
#[derive(Debug)]
pub struct CompositeMember {
    name: String,
    limiter: RateLimiter,
    /// Member-specific policy; the caller's policy applies when unset
    policy: Option<Policy>,
}

impl CompositeMember {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> Option<Policy> {
        self.policy
    }
}

/// Combines named limiters; the most restrictive member wins.
#[derive(Debug, Default)]
pub struct CompositeLimiter {
    members: Vec<CompositeMember>,
}

impl CompositeLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member that uses the policy passed to each check.
    pub fn with_member(mut self, name: impl Into<String>, limiter: impl Into<RateLimiter>) -> Self {
        self.members.push(CompositeMember {
            name: name.into(),
            limiter: limiter.into(),
            policy: None,
        });
        self
    }

    /// Add a member with its own fixed policy.
    pub fn with_member_policy(
        mut self,
        name: impl Into<String>,
        limiter: impl Into<RateLimiter>,
        policy: Policy,
    ) -> Self {
        self.members.push(CompositeMember {
            name: name.into(),
            limiter: limiter.into(),
            policy: Some(policy),
        });
        self
    }

    pub fn members(&self) -> &[CompositeMember] {
        &self.members
    }

    /// Check every member against `key`.
    ///
    /// Members with their own policy use it; the rest use `policy`.
    pub fn check(&self, key: &str, policy: &Policy) -> Result<RateLimitResult> {
        self.evaluate(key, |member| Ok(member.policy.unwrap_or(*policy)))
    }

    /// Check every member against `key` with per-member policies.
    ///
    /// A policy in `policies` takes precedence over the member's own; a
    /// member with neither is a policy error.
    pub fn check_with_policies(
        &self,
        key: &str,
        policies: &HashMap<String, Policy>,
    ) -> Result<RateLimitResult> {
        self.evaluate(key, |member| {
            policies
                .get(&member.name)
                .copied()
                .or(member.policy)
                .ok_or_else(|| {
                    GatekeeperError::Policy(format!("no policy for composite member '{}'", member.name))
                })
        })
    }

    fn evaluate(
        &self,
        key: &str,
        resolve: impl Fn(&CompositeMember) -> Result<Policy>,
    ) -> Result<RateLimitResult> {
        if self.members.is_empty() {
            return Err(GatekeeperError::Config(
                "composite limiter has no members".to_string(),
            ));
        }

        // Resolve and validate up front so a bad policy never leaves
        // earlier members half-updated.
        let policies = self
            .members
            .iter()
            .map(|member| {
                let policy = resolve(member)?;
                policy.validate()?;
                Ok(policy)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut results = Vec::with_capacity(self.members.len());
        for (member, policy) in self.members.iter().zip(&policies) {
            results.push((member.name.as_str(), member.limiter.check(key, policy)?));
        }

        Ok(combine(key, &results))
    }

    /// Reset `key` in every member.
    pub fn reset(&self, key: &str) {
        for member in &self.members {
            member.limiter.reset(key);
        }
    }

    /// Largest key count across members.
    pub fn key_count(&self) -> usize {
        self.members
            .iter()
            .map(|member| member.limiter.key_count())
            .max()
            .unwrap_or(0)
    }

    /// Evict idle keys from every member; returns the total evicted.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        self.members
            .iter()
            .map(|member| member.limiter.evict_idle(idle_ttl))
            .sum()
    }
}

/// Fold member results into one.
fn combine(key: &str, results: &[(&str, RateLimitResult)]) -> RateLimitResult {
    let denied: Vec<&(&str, RateLimitResult)> =
        results.iter().filter(|(_, result)| !result.allowed()).collect();

    let remaining = results.iter().map(|(_, r)| r.remaining()).min().unwrap_or(0);
    let limit = results.iter().map(|(_, r)| r.limit()).min().unwrap_or(0);

    if denied.is_empty() {
        let names: Vec<&str> = results.iter().map(|(name, _)| *name).collect();
        let reset_time = results
            .iter()
            .map(|(_, r)| r.reset_time())
            .max()
            .unwrap_or_default();
        return RateLimitResult::allow(names.join(","), limit, remaining, reset_time);
    }

    let names: Vec<&str> = denied.iter().map(|(name, _)| *name).collect();
    let reset_time = denied
        .iter()
        .map(|(_, r)| r.reset_time())
        .max()
        .unwrap_or_default();
    let retry_after = denied
        .iter()
        .filter_map(|(_, r)| r.retry_after())
        .max()
        .unwrap_or_default();

    debug!(key = %key, denied_by = %names.join(","), "Composite limit exceeded");

    RateLimitResult::deny(names.join(","), limit, reset_time, retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::{FixedWindowLimiter, SlidingWindowLimiter, TokenBucketLimiter};
    use std::sync::Arc;

    fn burst_and_sustained(clock: &ManualClock) -> CompositeLimiter {
        CompositeLimiter::new()
            .with_member_policy(
                "burst",
                TokenBucketLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(10, 60),
            )
            .with_member_policy(
                "per_window",
                FixedWindowLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(3, 60),
            )
    }

    #[test]
    fn test_most_restrictive_member_denies() {
        let clock = ManualClock::new(Duration::from_secs(6_000));
        let composite = burst_and_sustained(&clock);
        let policy = Policy::default();

        for i in 0..3 {
            let result = composite.check("client", &policy).unwrap();
            assert!(result.allowed(), "request {} should be allowed", i + 1);
            assert_eq!(result.limit_type(), "burst,per_window");
        }

        let denied = composite.check("client", &policy).unwrap();
        assert!(!denied.allowed());
        assert_eq!(denied.limit_type(), "per_window");
        assert_eq!(denied.remaining(), 0);
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_remaining_is_minimum() {
        let clock = ManualClock::new(Duration::from_secs(6_000));
        let composite = burst_and_sustained(&clock);

        let result = composite.check("client", &Policy::default()).unwrap();
        // Bucket has 19 left, the window has 2
        assert_eq!(result.remaining(), 2);
        assert_eq!(result.limit(), 3);
    }

    #[test]
    fn test_all_members_evaluated_after_denial() {
        let clock = ManualClock::new(Duration::from_secs(6_000));
        let bucket = TokenBucketLimiter::new().with_clock(Arc::new(clock.clone()));
        let composite = CompositeLimiter::new()
            .with_member_policy(
                "window",
                FixedWindowLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(1, 60),
            )
            .with_member_policy("bucket", bucket, Policy::from_secs(10, 60));

        for _ in 0..5 {
            composite.check("client", &Policy::default()).unwrap();
        }

        // The bucket was consumed on all five calls, including four denials
        let RateLimiter::TokenBucket(bucket) = composite.members()[1].limiter() else {
            panic!("expected a token bucket member");
        };
        assert!((bucket.tokens("client").unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_retry_after_is_maximum_of_denials() {
        let clock = ManualClock::new(Duration::from_secs(6_000));
        let composite = CompositeLimiter::new()
            .with_member_policy(
                "short",
                FixedWindowLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(1, 10),
            )
            .with_member_policy(
                "long",
                SlidingWindowLimiter::new().with_clock(Arc::new(clock.clone())),
                Policy::from_secs(1, 30),
            );

        composite.check("client", &Policy::default()).unwrap();
        let denied = composite.check("client", &Policy::default()).unwrap();
        assert!(!denied.allowed());
        assert_eq!(denied.limit_type(), "short,long");
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_members_share_caller_policy() {
        let composite = CompositeLimiter::new()
            .with_member("window", FixedWindowLimiter::new())
            .with_member("log", SlidingWindowLimiter::new());
        let policy = Policy::from_secs(2, 3_600);

        assert!(composite.check("client", &policy).unwrap().allowed());
        assert!(composite.check("client", &policy).unwrap().allowed());
        assert!(!composite.check("client", &policy).unwrap().allowed());
    }

    #[test]
    fn test_check_with_policies() {
        let composite = CompositeLimiter::new()
            .with_member("window", FixedWindowLimiter::new())
            .with_member_policy("log", SlidingWindowLimiter::new(), Policy::from_secs(5, 60));

        let mut policies = HashMap::new();
        policies.insert("window".to_string(), Policy::from_secs(1, 3_600));

        assert!(composite.check_with_policies("client", &policies).unwrap().allowed());
        let denied = composite.check_with_policies("client", &policies).unwrap();
        assert_eq!(denied.limit_type(), "window");

        let missing = composite.check_with_policies("client", &HashMap::new());
        assert!(matches!(missing, Err(GatekeeperError::Policy(_))));
    }

    #[test]
    fn test_invalid_policy_leaves_state_untouched() {
        let composite = CompositeLimiter::new()
            .with_member_policy("bucket", TokenBucketLimiter::new(), Policy::from_secs(10, 60))
            .with_member("window", FixedWindowLimiter::new());

        let result = composite.check("client", &Policy::from_secs(0, 60));
        assert!(matches!(result, Err(GatekeeperError::Policy(_))));
        assert_eq!(composite.key_count(), 0);
    }

    #[test]
    fn test_empty_composite_is_an_error() {
        let composite = CompositeLimiter::new();
        assert!(matches!(
            composite.check("client", &Policy::default()),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_reset_resets_all_members() {
        let composite = CompositeLimiter::new()
            .with_member("window", FixedWindowLimiter::new())
            .with_member("log", SlidingWindowLimiter::new());
        let policy = Policy::from_secs(1, 3_600);

        composite.check("client", &policy).unwrap();
        assert!(!composite.check("client", &policy).unwrap().allowed());

        composite.reset("client");
        assert!(composite.check("client", &policy).unwrap().allowed());
    }
}
