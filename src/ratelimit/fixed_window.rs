//! Fixed window counter limiter.
//!
//! Windows are aligned to multiples of the window length since the Unix
//! epoch. A client may send up to `2 × limit` requests around a window
//! boundary (the end of one window and the start of the next); this is
//! inherent to fixed windows and is preserved deliberately.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{default_clock, Clock};
use super::policy::Policy;
use super::result::RateLimitResult;
use super::store::KeyStore;
use crate::error::Result;

/// Tag reported in results produced by this limiter.
pub const FIXED_WINDOW: &str = "fixed_window";

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Per-key counter for the current window.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start: Duration,
    count: u64,
}

/// Fixed window rate limiter.
pub struct FixedWindowLimiter {
    counters: KeyStore<WindowCounter>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self {
            counters: KeyStore::new(),
            clock: default_clock(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Count the request against the window containing now.
    pub fn check(&self, key: &str, policy: &Policy) -> Result<RateLimitResult> {
        policy.validate()?;

        let window = policy.window;
        let limit = policy.limit;

        let result = self.counters.with_state(
            key,
            self.clock.as_ref(),
            window,
            |now| {
                debug!(key = %key, window = ?window, "Creating new fixed window counter");
                WindowCounter {
                    window_start: window_start(now, window),
                    count: 0,
                }
            },
            |counter, now| {
                let current_start = window_start(now, window);
                if counter.window_start < current_start {
                    counter.count = 0;
                    counter.window_start = current_start;
                }

                let reset_time = counter.window_start.saturating_add(window);
                if counter.count < limit {
                    counter.count += 1;
                    RateLimitResult::allow(FIXED_WINDOW, limit, limit - counter.count, reset_time)
                } else {
                    RateLimitResult::deny(
                        FIXED_WINDOW,
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
            "Fixed window check"
        );

        Ok(result)
    }

    /// Requests counted in the stored window for `key`.
    pub fn count(&self, key: &str) -> Option<u64> {
        self.counters.inspect(key, |counter| counter.count)
    }

    /// Forget the counter for `key`.
    pub fn reset(&self, key: &str) {
        self.counters.remove(key);
    }

    /// Number of keys with a counter.
    pub fn key_count(&self) -> usize {
        self.counters.len()
    }

    /// Drop counters idle for at least `idle_ttl`.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        self.counters.evict_idle(self.clock.now(), idle_ttl)
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("keys", &self.counters.len())
            .finish()
    }
}

/// `floor(now / window) × window`, computed in nanoseconds.
fn window_start(now: Duration, window: Duration) -> Duration {
    let window_nanos = window.as_nanos();
    let start = now.as_nanos() / window_nanos * window_nanos;
    Duration::new(
        (start / NANOS_PER_SEC) as u64,
        (start % NANOS_PER_SEC) as u32,
    )
}
