//! Sliding window log limiter.
//!
//! Keeps the timestamp of every admitted request inside the trailing
//! window and admits a new request only while fewer than `limit` remain.
//!
//! Memory per key is bounded by `max_entries_per_key`. When the log would
//! grow past that bound the oldest entries are dropped, which undercounts
//! history for policies whose limit exceeds the bound. That is an accepted
//! accuracy/memory tradeoff, not a correctness bug.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{default_clock, Clock};
use super::policy::Policy;
use super::result::RateLimitResult;
use super::store::KeyStore;
use crate::error::{GatekeeperError, Result};

/// Tag reported in results produced by this limiter.
pub const SLIDING_WINDOW: &str = "sliding_window";

/// Timestamps retained per key when not configured.
pub const DEFAULT_MAX_ENTRIES_PER_KEY: usize = 10_000;

/// Sliding window log rate limiter.
pub struct SlidingWindowLimiter {
    max_entries_per_key: usize,
    logs: KeyStore<VecDeque<Duration>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the default per-key bound.
    pub fn new() -> Self {
        Self {
            max_entries_per_key: DEFAULT_MAX_ENTRIES_PER_KEY,
            logs: KeyStore::new(),
            clock: default_clock(),
        }
    }

    /// Create a limiter retaining at most `max_entries` timestamps per key.
    pub fn with_max_entries(max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(GatekeeperError::Config(
                "max_entries_per_key must be positive".to_string(),
            ));
        }
        Ok(Self {
            max_entries_per_key: max_entries,
            ..Self::new()
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_entries_per_key(&self) -> usize {
        self.max_entries_per_key
    }

    /// Prune expired timestamps, then admit if fewer than `limit` remain.
    pub fn check(&self, key: &str, policy: &Policy) -> Result<RateLimitResult> {
        policy.validate()?;

        let window = policy.window;
        let limit = policy.limit;
        let max_entries = self.max_entries_per_key;

        let result = self.logs.with_state(
            key,
            self.clock.as_ref(),
            window,
            |_| {
                debug!(key = %key, "Creating new sliding window log");
                VecDeque::new()
            },
            |log, now| {
                // Entries at or before the cutoff have left the window
                if let Some(cutoff) = now.checked_sub(window) {
                    while log.front().map_or(false, |&t| t <= cutoff) {
                        log.pop_front();
                    }
                }

                let count = log.len() as u64;
                if count < limit {
                    log.push_back(now);
                    while log.len() > max_entries {
                        log.pop_front();
                    }
                    let oldest = log.front().copied().unwrap_or(now);
                    RateLimitResult::allow(
                        SLIDING_WINDOW,
                        limit,
                        limit - count - 1,
                        oldest.saturating_add(window),
                    )
                } else {
                    let oldest = log.front().copied().unwrap_or(now);
                    let reset_time = oldest.saturating_add(window);
                    RateLimitResult::deny(
                        SLIDING_WINDOW,
                        limit,
                        reset_time,
                        reset_time.saturating_sub(now),
                    )
                }
            },
        );

        trace!(
            key = %key,
            allowed = result.allowed(),
            remaining = result.remaining(),
            "Sliding window check"
        );

        Ok(result)
    }

    /// Number of timestamps retained for `key` as of its last check.
    pub fn window_len(&self, key: &str) -> Option<usize> {
        self.logs.inspect(key, |log| log.len())
    }

    /// Clear the log for `key`.
    pub fn reset(&self, key: &str) {
        self.logs.remove(key);
    }

    /// Number of keys with a log.
    pub fn key_count(&self) -> usize {
        self.logs.len()
    }

    /// Drop logs idle for at least `idle_ttl`.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        self.logs.evict_idle(self.clock.now(), idle_ttl)
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("max_entries_per_key", &self.max_entries_per_key)
            .field("keys", &self.logs.len())
            .finish()
    }
}
